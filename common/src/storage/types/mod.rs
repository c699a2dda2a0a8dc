use serde::{Deserialize, Serialize};

pub mod kb_item;
pub mod upload;

pub trait StoredObject: Serialize + for<'de> Deserialize<'de> {
    fn table_name() -> &'static str;
    fn get_id(&self) -> &str;
}
