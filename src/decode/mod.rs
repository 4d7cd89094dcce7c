pub mod record;

pub use record::{decode_change_record, encode_change_record, AttributeValue, ChangeRecord, ColumnMeta, Tuple};
