pub mod embedding_service;
pub mod filing_service;
pub mod learning_service;
pub mod move_service;
pub mod peek_service;
pub mod scorer_service;
pub mod watcher_service;
pub mod whitelist_service;
