// HTTP surface: upload, artifact retrieval and the embedded front page

pub mod api;
pub mod assets;
pub mod server;
