use tracing::debug;

use crate::storage::types::kb_item::KBItem;

/// Assembles the downstream consumer context from the item collection.
///
/// Only items marked for inclusion that carry non-empty extracted text
/// contribute. Items are taken in collection order and whole blocks are
/// dropped once the character budget would be exceeded.
pub fn assemble_context(items: &[KBItem], max_chars: usize) -> String {
    let mut assembled = String::new();
    let mut included = 0usize;

    for item in items {
        if !item.include {
            continue;
        }
        let Some(text) = item.text.as_deref().filter(|t| !t.trim().is_empty()) else {
            continue;
        };

        let block = format!("# {}\n{}", item.name, text);
        let separator_len = if assembled.is_empty() { 0 } else { 2 };
        if assembled.chars().count() + separator_len + block.chars().count() > max_chars {
            debug!(item_id = %item.id, "context budget reached; remaining items dropped");
            break;
        }

        if !assembled.is_empty() {
            assembled.push_str("\n\n");
        }
        assembled.push_str(&block);
        included += 1;
    }

    debug!(included, chars = assembled.chars().count(), "assembled context");
    assembled
}
