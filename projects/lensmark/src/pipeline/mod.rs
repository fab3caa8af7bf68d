// Media detection pipeline

pub mod annotate;
pub mod detection;
pub mod image_analyzer;
pub mod orchestrator;
pub mod transcode;
pub mod types;
pub mod video_pipeline;
