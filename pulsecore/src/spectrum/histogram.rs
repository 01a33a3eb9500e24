use std::fmt;
use std::fmt::{Display, Formatter};

use bincode::error::{DecodeError, EncodeError};
use bincode::{Decode, Encode};
use serde::{Deserialize, Serialize};

use crate::error::{PulseError, Result};

/// Uniform binning over `[lower, upper)`.
///
/// Always holds at least one bin and finite, ordered bounds: deserializing
/// and decoding go through [`Axis::new`].
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "AxisBounds", into = "AxisBounds")]
pub struct Axis {
    bins: usize,
    lower: f64,
    upper: f64,
}

#[derive(Serialize, Deserialize)]
struct AxisBounds {
    bins: usize,
    lower: f64,
    upper: f64,
}

impl TryFrom<AxisBounds> for Axis {
    type Error = PulseError;

    fn try_from(bounds: AxisBounds) -> Result<Self> {
        Axis::new(bounds.bins, bounds.lower, bounds.upper)
    }
}

impl From<Axis> for AxisBounds {
    fn from(axis: Axis) -> Self {
        AxisBounds {
            bins: axis.bins,
            lower: axis.lower,
            upper: axis.upper,
        }
    }
}

impl Encode for Axis {
    fn encode<E: bincode::enc::Encoder>(&self, encoder: &mut E) -> std::result::Result<(), EncodeError> {
        bincode::Encode::encode(&self.bins, encoder)?;
        bincode::Encode::encode(&self.lower, encoder)?;
        bincode::Encode::encode(&self.upper, encoder)?;
        Ok(())
    }
}

impl<Context> Decode<Context> for Axis {
    fn decode<D: bincode::de::Decoder<Context = Context>>(decoder: &mut D) -> std::result::Result<Self, DecodeError> {
        let bins: usize = bincode::Decode::decode(decoder)?;
        let lower: f64 = bincode::Decode::decode(decoder)?;
        let upper: f64 = bincode::Decode::decode(decoder)?;
        Axis::new(bins, lower, upper).map_err(|e| DecodeError::OtherString(e.to_string()))
    }
}

impl<'de, Context> bincode::BorrowDecode<'de, Context> for Axis {
    fn borrow_decode<D: bincode::de::BorrowDecoder<'de, Context = Context>>(
        decoder: &mut D,
    ) -> std::result::Result<Self, DecodeError> {
        let bins: usize = bincode::BorrowDecode::borrow_decode(decoder)?;
        let lower: f64 = bincode::BorrowDecode::borrow_decode(decoder)?;
        let upper: f64 = bincode::BorrowDecode::borrow_decode(decoder)?;
        Axis::new(bins, lower, upper).map_err(|e| DecodeError::OtherString(e.to_string()))
    }
}

impl Axis {
    pub fn new(bins: usize, lower: f64, upper: f64) -> Result<Self> {
        if bins == 0 {
            return Err(PulseError::InvalidHistogram("bin count must be positive".to_string()));
        }
        if !lower.is_finite() || !upper.is_finite() || lower >= upper {
            return Err(PulseError::InvalidHistogram(format!(
                "bounds must be finite with lower < upper, got [{}, {})",
                lower, upper
            )));
        }
        Ok(Axis { bins, lower, upper })
    }

    pub fn bins(&self) -> usize {
        self.bins
    }

    pub fn lower(&self) -> f64 {
        self.lower
    }

    pub fn upper(&self) -> f64 {
        self.upper
    }

    pub fn width(&self) -> f64 {
        (self.upper - self.lower) / self.bins as f64
    }

    pub fn center(&self, bin: usize) -> f64 {
        self.lower + (bin as f64 + 0.5) * self.width()
    }

    pub fn low_edge(&self, bin: usize) -> f64 {
        self.lower + bin as f64 * self.width()
    }

    /// Bin index of `x`, `Err(true)` above the axis, `Err(false)` below (or NaN).
    pub fn locate(&self, x: f64) -> std::result::Result<usize, bool> {
        if x.is_nan() || x < self.lower {
            return Err(false);
        }
        if x >= self.upper {
            return Err(true);
        }
        let bin = ((x - self.lower) / self.width()) as usize;
        // rounding at the top edge
        Ok(bin.min(self.bins - 1))
    }
}

/// Fixed-bin 1-D histogram with under- and overflow counters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Encode, Decode)]
pub struct Histogram1D {
    pub axis: Axis,
    pub contents: Vec<f64>,
    pub underflow: f64,
    pub overflow: f64,
    pub entries: u64,
}

impl Histogram1D {
    /// Constructs an empty histogram.
    ///
    /// # Example
    ///
    /// ```rust
    /// # use pulsecore::spectrum::histogram::Histogram1D;
    /// let mut histogram = Histogram1D::new(10, 0.0, 100.0).unwrap();
    /// histogram.fill(15.0);
    /// histogram.fill(150.0);
    /// assert_eq!(histogram.contents[1], 1.0);
    /// assert_eq!(histogram.overflow, 1.0);
    /// assert_eq!(histogram.entries, 2);
    /// ```
    pub fn new(bins: usize, lower: f64, upper: f64) -> Result<Self> {
        Ok(Self::with_axis(Axis::new(bins, lower, upper)?))
    }

    pub fn with_axis(axis: Axis) -> Self {
        Histogram1D {
            axis,
            contents: vec![0.0; axis.bins()],
            underflow: 0.0,
            overflow: 0.0,
            entries: 0,
        }
    }

    /// Same binning, given contents, no entries recorded.
    pub fn from_contents(axis: Axis, contents: Vec<f64>) -> Result<Self> {
        if contents.len() != axis.bins() {
            return Err(PulseError::InvalidHistogram(format!(
                "{} contents for {} bins",
                contents.len(),
                axis.bins()
            )));
        }
        Ok(Histogram1D {
            axis,
            contents,
            underflow: 0.0,
            overflow: 0.0,
            entries: 0,
        })
    }

    pub fn fill(&mut self, x: f64) {
        self.fill_weighted(x, 1.0);
    }

    pub fn fill_weighted(&mut self, x: f64, weight: f64) {
        self.entries += 1;
        match self.axis.locate(x) {
            Ok(bin) => self.contents[bin] += weight,
            Err(true) => self.overflow += weight,
            Err(false) => self.underflow += weight,
        }
    }

    pub fn bins(&self) -> usize {
        self.axis.bins()
    }

    pub fn bin_center(&self, bin: usize) -> f64 {
        self.axis.center(bin)
    }

    pub fn bin_width(&self) -> f64 {
        self.axis.width()
    }

    /// Sum of in-range bin contents.
    pub fn integral(&self) -> f64 {
        self.contents.iter().sum()
    }

    pub fn same_binning(&self, other: &Histogram1D) -> bool {
        self.axis == other.axis
    }

    /// Adds another histogram bin for bin.
    pub fn merge(&mut self, other: &Histogram1D) -> Result<()> {
        if !self.same_binning(other) {
            return Err(PulseError::BinningMismatch(format!(
                "{:?} vs {:?}",
                self.axis, other.axis
            )));
        }
        for (a, b) in self.contents.iter_mut().zip(other.contents.iter()) {
            *a += *b;
        }
        self.underflow += other.underflow;
        self.overflow += other.overflow;
        self.entries += other.entries;
        Ok(())
    }

    /// Copy with every bin multiplied by `factor`.
    pub fn scaled(&self, factor: f64) -> Histogram1D {
        Histogram1D {
            axis: self.axis,
            contents: self.contents.iter().map(|c| c * factor).collect(),
            underflow: self.underflow * factor,
            overflow: self.overflow * factor,
            entries: self.entries,
        }
    }

    /// Indices of bins whose centers lie in `[lo, hi]`.
    pub fn bin_range(&self, lo: f64, hi: f64) -> std::ops::Range<usize> {
        let first = (0..self.bins()).find(|&b| self.bin_center(b) >= lo);
        let last = (0..self.bins()).rev().find(|&b| self.bin_center(b) <= hi);
        match (first, last) {
            (Some(f), Some(l)) if f <= l => f..l + 1,
            _ => 0..0,
        }
    }
}

impl Display for Histogram1D {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(
            f,
            "Histogram1D(bins: {}, range: [{}, {}), entries: {}, integral: {})",
            self.axis.bins(),
            self.axis.lower(),
            self.axis.upper(),
            self.entries,
            self.integral()
        )
    }
}

/// Fixed-bin 2-D histogram, row-major in y (`contents[iy * x.bins + ix]`).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Encode, Decode)]
pub struct Histogram2D {
    pub x: Axis,
    pub y: Axis,
    pub contents: Vec<f64>,
    /// Entries falling outside either axis.
    pub outside: f64,
    pub entries: u64,
}

impl Histogram2D {
    pub fn new(x: Axis, y: Axis) -> Self {
        Histogram2D {
            x,
            y,
            contents: vec![0.0; x.bins() * y.bins()],
            outside: 0.0,
            entries: 0,
        }
    }

    pub fn fill(&mut self, x: f64, y: f64) {
        self.entries += 1;
        match (self.x.locate(x), self.y.locate(y)) {
            (Ok(ix), Ok(iy)) => self.contents[iy * self.x.bins() + ix] += 1.0,
            _ => self.outside += 1.0,
        }
    }

    pub fn get(&self, ix: usize, iy: usize) -> f64 {
        self.contents[iy * self.x.bins() + ix]
    }

    pub fn merge(&mut self, other: &Histogram2D) -> Result<()> {
        if self.x != other.x || self.y != other.y {
            return Err(PulseError::BinningMismatch(format!(
                "({:?}, {:?}) vs ({:?}, {:?})",
                self.x, self.y, other.x, other.y
            )));
        }
        for (a, b) in self.contents.iter_mut().zip(other.contents.iter()) {
            *a += *b;
        }
        self.outside += other.outside;
        self.entries += other.entries;
        Ok(())
    }

    /// Projection onto y of the x band `[x_lo, x_hi]` (by bin center).
    pub fn slice_x(&self, x_lo: f64, x_hi: f64) -> Histogram1D {
        let mut slice = Histogram1D::with_axis(self.y);
        for ix in 0..self.x.bins() {
            let c = self.x.center(ix);
            if c < x_lo || c > x_hi {
                continue;
            }
            for iy in 0..self.y.bins() {
                slice.contents[iy] += self.get(ix, iy);
            }
        }
        slice.entries = slice.integral() as u64;
        slice
    }

    /// Projection onto x of the y band `[y_lo, y_hi]` (by bin center).
    pub fn slice_y(&self, y_lo: f64, y_hi: f64) -> Histogram1D {
        let mut slice = Histogram1D::with_axis(self.x);
        for iy in 0..self.y.bins() {
            let c = self.y.center(iy);
            if c < y_lo || c > y_hi {
                continue;
            }
            for ix in 0..self.x.bins() {
                slice.contents[ix] += self.get(ix, iy);
            }
        }
        slice.entries = slice.integral() as u64;
        slice
    }
}
