use redb::TableDefinition;

/// Image records: record id -> ImageRecord (msgpack)
pub const IMAGES: TableDefinition<&str, &[u8]> = TableDefinition::new("images");

/// Creation-order index: (created_at micros, record id) -> ()
pub const IMAGES_BY_CREATED: TableDefinition<(i64, &str), ()> =
    TableDefinition::new("images_by_created");

/// Per-scope creation-order index: (scope id, created_at micros, record id) -> ()
pub const SCOPE_IMAGES_BY_CREATED: TableDefinition<(&str, i64, &str), ()> =
    TableDefinition::new("scope_images_by_created");
