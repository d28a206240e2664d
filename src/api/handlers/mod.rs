mod admin;
mod cache;
mod pools;
mod posts;
mod similarity;

pub use admin::{admin_purge, health};
pub use cache::serve_cache;
pub use pools::{delete_pool_element, get_similarity_pool};
pub use posts::{create_post, delete_post};
pub use similarity::{check_posts, check_similarity, generate_similarity, run_similarity};
