pub mod error;

// waveform module
pub mod waveform {
    pub mod buffer;
    pub mod baseline;
    pub mod peak;
    pub mod limits;
    pub mod pileup;
    pub mod integrate;
}

// spectrum module
pub mod spectrum {
    pub mod histogram;
    pub mod background;
    pub mod fit;
    pub mod builder;
}

pub mod calibration;

// pulse shape discrimination module
pub mod psd {
    pub mod polygon;
    pub mod discriminator;
}

pub use error::{PulseError, Result};
pub use waveform::buffer::{Polarity, Waveform};
pub use waveform::peak::PeakInfo;
pub use spectrum::histogram::{Axis, Histogram1D, Histogram2D};
pub use spectrum::builder::SpectrumBuilder;
pub use calibration::{CalibrationPoint, Calibrator};
pub use psd::polygon::PsdFilterPolygon;
pub use psd::discriminator::{PsdDiscriminator, PsdIntegrals};
