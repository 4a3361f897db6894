use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Field holding a record's identifier on the wire
pub const ID_FIELD: &str = "_id";
/// Field holding a record's title
pub const TITLE_FIELD: &str = "title";
/// RFC 3339 time the record was created, used to order listings
pub const UPLOAD_DATE_FIELD: &str = "uploadDate";

/// A song document from the songs collection
///
/// Only `_id` and `title` are interpreted. Every other field the document
/// carries (file name, size, stem status, upload date, ...) is kept verbatim
/// in `fields` and written back unchanged on update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SongRecord {
    #[serde(rename = "_id")]
    pub id: String,
    pub title: String,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl SongRecord {
    /// Build a record from a raw document, dropping any `_id` or `title` keys
    /// it carries so they cannot shadow the columns
    pub fn from_document(id: String, title: String, mut fields: Map<String, Value>) -> Self {
        fields.remove(ID_FIELD);
        fields.remove(TITLE_FIELD);
        SongRecord { id, title, fields }
    }
}
