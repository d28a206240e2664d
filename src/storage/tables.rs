use redb::{MultimapTableDefinition, TableDefinition};

/// Post records: post_id -> PostRecord (msgpack)
pub const POSTS: TableDefinition<u64, &[u8]> = TableDefinition::new("posts");

/// Similarity data rows: id -> SimilarityData (msgpack)
pub const SIMILARITY_DATA: TableDefinition<u64, &[u8]> = TableDefinition::new("similarity_data");

/// Post index: post_id -> similarity data ids
pub const SIMILARITY_DATA_BY_POST: MultimapTableDefinition<u64, u64> =
    MultimapTableDefinition::new("similarity_data_by_post");

/// Chunk equality index: (chunk index, chunk hex) -> similarity data ids
pub const SIMILARITY_DATA_CHUNKS: MultimapTableDefinition<(u8, &str), u64> =
    MultimapTableDefinition::new("similarity_data_chunks");

/// Ratio range index: ratio * 10^4 -> similarity data ids
pub const SIMILARITY_DATA_RATIO: MultimapTableDefinition<u64, u64> =
    MultimapTableDefinition::new("similarity_data_ratio");

/// Pools: id -> SimilarityPool (msgpack)
pub const SIMILARITY_POOLS: TableDefinition<u64, &[u8]> = TableDefinition::new("similarity_pools");

/// Unique pool per post: post_id -> pool_id
pub const SIMILARITY_POOLS_BY_POST: TableDefinition<u64, u64> =
    TableDefinition::new("similarity_pools_by_post");

/// Pools populated as a batch subject: post_id -> pool_id
pub const SIMILARITY_POOL_SUBJECTS: TableDefinition<u64, u64> =
    TableDefinition::new("similarity_pool_subjects");

/// Elements: id -> SimilarityPoolElement (msgpack)
pub const SIMILARITY_POOL_ELEMENTS: TableDefinition<u64, &[u8]> =
    TableDefinition::new("similarity_pool_elements");

/// Unique element per pool and target post: (pool_id, post_id) -> element_id
pub const SIMILARITY_POOL_ELEMENT_INDEX: TableDefinition<(u64, u64), u64> =
    TableDefinition::new("similarity_pool_element_index");

/// Cached downloads: id -> MediaFile (msgpack)
pub const MEDIA_FILES: TableDefinition<u64, &[u8]> = TableDefinition::new("media_files");

/// URL index: media_url -> media file id
pub const MEDIA_FILES_BY_URL: TableDefinition<&str, u64> = TableDefinition::new("media_files_by_url");

/// Id sequences: table name -> last allocated id
pub const SEQUENCES: TableDefinition<&str, u64> = TableDefinition::new("sequences");
