use state_machines::state_machine;

use common::error::AppError;

/// Runtime preview lifecycle state; the typestate machine below validates
/// every transition before it is applied.
#[derive(Debug, Default, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
pub enum PreviewState {
    #[default]
    Idle,
    LoadingEngine,
    LoadingDocument,
    Ready,
    RenderingPage,
    Error,
}

impl PreviewState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PreviewState::Idle => "Idle",
            PreviewState::LoadingEngine => "LoadingEngine",
            PreviewState::LoadingDocument => "LoadingDocument",
            PreviewState::Ready => "Ready",
            PreviewState::RenderingPage => "RenderingPage",
            PreviewState::Error => "Error",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub enum PreviewTransition {
    LoadEngine,
    OpenDocument,
    DocumentLoaded,
    RenderPage,
    PageRendered,
    Fail,
    Retry,
    Close,
}

impl PreviewTransition {
    fn as_str(&self) -> &'static str {
        match self {
            PreviewTransition::LoadEngine => "load_engine",
            PreviewTransition::OpenDocument => "open_document",
            PreviewTransition::DocumentLoaded => "document_loaded",
            PreviewTransition::RenderPage => "render_page",
            PreviewTransition::PageRendered => "page_rendered",
            PreviewTransition::Fail => "fail",
            PreviewTransition::Retry => "retry",
            PreviewTransition::Close => "close",
        }
    }
}

mod lifecycle {
    use super::state_machine;

    state_machine! {
        name: PreviewLifecycleMachine,
        initial: Idle,
        states: [Idle, LoadingEngine, LoadingDocument, Ready, RenderingPage, Error],
        events {
            load_engine {
                transition: { from: Idle, to: LoadingEngine }
            }
            open_document {
                transition: { from: LoadingEngine, to: LoadingDocument }
            }
            document_loaded {
                transition: { from: LoadingDocument, to: Ready }
            }
            render_page {
                transition: { from: Ready, to: RenderingPage }
            }
            page_rendered {
                transition: { from: RenderingPage, to: Ready }
            }
            fail {
                transition: { from: Idle, to: Error }
                transition: { from: LoadingEngine, to: Error }
                transition: { from: LoadingDocument, to: Error }
                transition: { from: Ready, to: Error }
                transition: { from: RenderingPage, to: Error }
            }
            retry {
                transition: { from: Error, to: LoadingDocument }
            }
            close {
                transition: { from: Ready, to: Idle }
                transition: { from: Error, to: Idle }
            }
        }
    }

    pub(super) fn idle() -> PreviewLifecycleMachine<(), Idle> {
        PreviewLifecycleMachine::new(())
    }

    pub(super) fn loading_engine() -> PreviewLifecycleMachine<(), LoadingEngine> {
        idle()
            .load_engine()
            .expect("load_engine transition from Idle should exist")
    }

    pub(super) fn loading_document() -> PreviewLifecycleMachine<(), LoadingDocument> {
        loading_engine()
            .open_document()
            .expect("open_document transition from LoadingEngine should exist")
    }

    pub(super) fn ready() -> PreviewLifecycleMachine<(), Ready> {
        loading_document()
            .document_loaded()
            .expect("document_loaded transition from LoadingDocument should exist")
    }

    pub(super) fn rendering_page() -> PreviewLifecycleMachine<(), RenderingPage> {
        ready()
            .render_page()
            .expect("render_page transition from Ready should exist")
    }

    pub(super) fn error() -> PreviewLifecycleMachine<(), Error> {
        ready().fail().expect("fail transition from Ready should exist")
    }
}

pub fn invalid_transition(state: &PreviewState, event: PreviewTransition) -> AppError {
    AppError::Validation(format!(
        "Invalid preview transition: {} -> {}",
        state.as_str(),
        event.as_str()
    ))
}

pub fn compute_next_state(
    state: &PreviewState,
    event: PreviewTransition,
) -> Result<PreviewState, AppError> {
    use lifecycle::*;
    match (state, event) {
        (PreviewState::Idle, PreviewTransition::LoadEngine) => idle()
            .load_engine()
            .map(|_| PreviewState::LoadingEngine)
            .map_err(|_| invalid_transition(state, event)),
        (PreviewState::LoadingEngine, PreviewTransition::OpenDocument) => loading_engine()
            .open_document()
            .map(|_| PreviewState::LoadingDocument)
            .map_err(|_| invalid_transition(state, event)),
        (PreviewState::LoadingDocument, PreviewTransition::DocumentLoaded) => loading_document()
            .document_loaded()
            .map(|_| PreviewState::Ready)
            .map_err(|_| invalid_transition(state, event)),
        (PreviewState::Ready, PreviewTransition::RenderPage) => ready()
            .render_page()
            .map(|_| PreviewState::RenderingPage)
            .map_err(|_| invalid_transition(state, event)),
        (PreviewState::RenderingPage, PreviewTransition::PageRendered) => rendering_page()
            .page_rendered()
            .map(|_| PreviewState::Ready)
            .map_err(|_| invalid_transition(state, event)),
        (PreviewState::Idle, PreviewTransition::Fail) => idle()
            .fail()
            .map(|_| PreviewState::Error)
            .map_err(|_| invalid_transition(state, event)),
        (PreviewState::LoadingEngine, PreviewTransition::Fail) => loading_engine()
            .fail()
            .map(|_| PreviewState::Error)
            .map_err(|_| invalid_transition(state, event)),
        (PreviewState::LoadingDocument, PreviewTransition::Fail) => loading_document()
            .fail()
            .map(|_| PreviewState::Error)
            .map_err(|_| invalid_transition(state, event)),
        (PreviewState::Ready, PreviewTransition::Fail) => ready()
            .fail()
            .map(|_| PreviewState::Error)
            .map_err(|_| invalid_transition(state, event)),
        (PreviewState::RenderingPage, PreviewTransition::Fail) => rendering_page()
            .fail()
            .map(|_| PreviewState::Error)
            .map_err(|_| invalid_transition(state, event)),
        (PreviewState::Error, PreviewTransition::Retry) => error()
            .retry()
            .map(|_| PreviewState::LoadingDocument)
            .map_err(|_| invalid_transition(state, event)),
        (PreviewState::Ready, PreviewTransition::Close) => ready()
            .close()
            .map(|_| PreviewState::Idle)
            .map_err(|_| invalid_transition(state, event)),
        (PreviewState::Error, PreviewTransition::Close) => error()
            .close()
            .map(|_| PreviewState::Idle)
            .map_err(|_| invalid_transition(state, event)),
        _ => Err(invalid_transition(state, event)),
    }
}
