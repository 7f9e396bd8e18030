use num_traits::AsPrimitive;

#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub struct Complex<T> {
    pub re: T,
    pub im: T,
}

impl<T> Complex<T> {
    pub fn new(re: T, im: T) -> Self {
        Self { re, im }
    }
}

impl<T: AsPrimitive<f32>> Complex<T> {
    /// Widen both components to `f32`
    pub fn to_f32(self) -> ComplexFloat {
        Complex::new(self.re.as_(), self.im.as_())
    }

    pub fn norm_sqr(self) -> f32 {
        let c = self.to_f32();
        c.re * c.re + c.im * c.im
    }
}

/// The type of raw channel data in a GUPPI block
pub type ComplexByte = Complex<i8>;

/// Raw channel data converted for downstream processing
pub type ComplexFloat = Complex<f32>;
