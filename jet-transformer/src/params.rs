use rand::Rng;
use rand_distr::{Distribution, StandardNormal};

/// Ordered, named access to learnable parameters.
///
/// The order returned by [`Parameterized::parameters`] is stable and matches
/// [`Parameterized::parameters_mut`], so it can be used as a storage layout.
pub trait Parameterized {
    fn parameters(&self) -> Vec<(String, &[f32])>;

    fn parameters_mut(&mut self) -> Vec<(String, &mut [f32])>;

    fn num_parameters(&self) -> usize {
        self.parameters().iter().map(|(_, values)| values.len()).sum()
    }
}

/// Prepends `prefix.` to every parameter name.
pub(crate) fn with_prefix<T>(prefix: &str, params: Vec<(String, T)>) -> Vec<(String, T)> {
    params.into_iter().map(|(name, values)| (format!("{prefix}.{name}"), values)).collect()
}

/// Samples `len` values from U(-bound, bound).
pub(crate) fn uniform<R: Rng + ?Sized>(rng: &mut R, len: usize, bound: f32) -> Vec<f32> {
    (0..len).map(|_| rng.random_range(-bound..bound)).collect()
}

/// Samples `len` values from N(0, 1).
pub(crate) fn standard_normal<R: Rng + ?Sized>(rng: &mut R, len: usize) -> Vec<f32> {
    (0..len).map(|_| StandardNormal.sample(rng)).collect()
}
