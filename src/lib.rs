pub mod reader;
pub mod rename;
pub mod segment;
pub mod transform;

pub use reader::{Chunk, SegmentReader};
pub use rename::{RenamePolicy, SuffixRenamePolicy};
pub use segment::{FileSegment, SegmentError, SegmentOptions, WriteOutcome, DEFAULT_CHUNK_SIZE};
pub use transform::{TransformRegistry, MACBINARY_CONTENT_TYPE};
