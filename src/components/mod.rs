pub mod array;
pub mod handle;
pub mod indexes;
pub mod info;
pub mod normalize;
pub mod preview;
pub mod source;
pub mod statistics;

pub use array::PixelArray;
pub use handle::{DatasetHandle, DatasetTable};
pub use indexes::{BandMapping, SpectralIndex};
pub use info::{BandInfo, DataType, GeoTransform, ImageInfo, Metadata};
pub use normalize::Normalization;
pub use source::Source;
pub use statistics::{BandStatistics, Histogram, Sampling};
