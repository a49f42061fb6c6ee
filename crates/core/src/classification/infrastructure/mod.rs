pub mod http_classification_client;
pub mod worker_pool_dispatch;
