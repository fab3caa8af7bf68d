pub mod convert;
pub mod opencv_reader;
pub mod opencv_writer;

use anyhow::Result;
use image::RgbImage;
use std::path::Path;

use self::opencv_reader::OpencvReader;
use self::opencv_writer::OpencvWriter;

/// Container metadata read when a video is opened.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VideoProperties {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    /// Frame count advertised by the container; may differ from what decodes.
    pub frame_count: usize,
}

/// Sequential frame source. Dropping the reader releases the decoder.
pub trait VideoReader: Send {
    fn properties(&self) -> VideoProperties;

    /// Next decoded frame, or `None` once the source is exhausted.
    fn next_frame(&mut self) -> Result<Option<RgbImage>>;
}

/// Sequential frame sink. `finish` flushes and closes the container; dropping
/// an unfinished writer still releases the encoder.
pub trait VideoWriter: Send {
    fn write_frame(&mut self, frame: &RgbImage) -> Result<()>;

    fn finish(self: Box<Self>) -> Result<()>;
}

/// Opens independent decode/encode handles for each pipeline invocation.
pub trait VideoBackend: Send + Sync {
    fn open_reader(&self, path: &Path) -> Result<Box<dyn VideoReader>>;

    fn open_writer(&self, path: &Path, properties: &VideoProperties)
        -> Result<Box<dyn VideoWriter>>;
}

/// OpenCV-backed decoding and encoding.
pub struct OpencvBackend {
    fourcc: [char; 4],
}

impl OpencvBackend {
    pub fn new(fourcc: [char; 4]) -> Self {
        Self { fourcc }
    }
}

impl VideoBackend for OpencvBackend {
    fn open_reader(&self, path: &Path) -> Result<Box<dyn VideoReader>> {
        Ok(Box::new(OpencvReader::open(path)?))
    }

    fn open_writer(
        &self,
        path: &Path,
        properties: &VideoProperties,
    ) -> Result<Box<dyn VideoWriter>> {
        Ok(Box::new(OpencvWriter::create(path, self.fourcc, properties)?))
    }
}

/// Parses a four-character codec code such as `mp4v`.
pub fn parse_fourcc(value: &str) -> Result<[char; 4], String> {
    let chars: Vec<char> = value.chars().collect();
    match chars.as_slice() {
        [a, b, c, d] if chars.iter().all(|ch| ch.is_ascii_graphic()) => Ok([*a, *b, *c, *d]),
        _ => Err(format!(
            "FOURCC must be exactly four printable ASCII characters, got '{}'",
            value
        )),
    }
}
