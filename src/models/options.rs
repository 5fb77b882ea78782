use bon::Builder;

/// Knobs for [`crate::decode_with`].
#[derive(Clone, Builder, Debug)]
pub struct DecodeOptions {
    /// Allowed distance of a vertex's bone-weight sum from 1.0.
    #[builder(default = 1e-3)]
    pub weight_tolerance: f32,
    /// Reject vertices with bad bone weights instead of logging them.
    #[builder(default = false)]
    pub strict_weights: bool,
    #[builder(default = 44)]
    pub min_version: i32,
    #[builder(default = 49)]
    pub max_version: i32,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        Self::builder().build()
    }
}
