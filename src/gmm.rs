//! Gaussian mixture color models for foreground and background.
//!
//! Each model holds [`COMPONENTS`] full-covariance Gaussians over RGB. The
//! first fit clusters samples by repeated principal-axis splitting, which
//! keeps the whole pipeline deterministic; later fits reassign every sample
//! to its most likely component and relearn the parameters.

use nalgebra::{Cholesky, Matrix3, SymmetricEigen, Vector3};

/// Number of Gaussian components per model.
pub(crate) const COMPONENTS: usize = 5;

/// Added to every covariance diagonal so each component is positive definite.
const VARIANCE_REGULARIZATION: f64 = 0.01;

/// Times the regularizer is grown tenfold before a component is dropped.
const REGULARIZATION_STEPS: i32 = 4;

/// Eigenvalue below which a cluster is not worth splitting.
const MIN_SPLIT_VARIANCE: f64 = 1e-9;

pub(crate) type Color = [f64; 3];

#[derive(Debug, Clone, Copy, PartialEq)]
struct Component {
    weight: f64,
    mean: Vector3<f64>,
    /// Inverse of the covariance's Cholesky factor, `L^-1`.
    whiten: Matrix3<f64>,
    /// `1 / sqrt(det(covariance))`
    norm: f64,
}

impl Component {
    /// Returns `None` if the covariance cannot be made positive definite.
    fn new(weight: f64, mean: Vector3<f64>, covariance: Matrix3<f64>) -> Option<Self> {
        let covariance = (covariance + covariance.transpose()) * 0.5;
        let cholesky = (0..REGULARIZATION_STEPS).find_map(|step| {
            let regularizer = VARIANCE_REGULARIZATION * 10f64.powi(step);
            Cholesky::new(covariance + Matrix3::identity() * regularizer)
        })?;

        let l = cholesky.l();
        // det(covariance) = prod(diag(L))^2
        let norm = 1.0 / l.diagonal().product();
        let whiten = l.try_inverse()?;
        if !norm.is_finite() || whiten.iter().any(|v| !v.is_finite()) {
            return None;
        }
        Some(Self {
            weight,
            mean,
            whiten,
            norm,
        })
    }

    /// Always within `[0, norm]`: the squared Mahalanobis distance is a
    /// squared norm of the whitened offset.
    fn density(&self, c: &Vector3<f64>) -> f64 {
        let mahalanobis = (self.whiten * (c - self.mean)).norm_squared();
        self.norm * (-0.5 * mahalanobis).exp()
    }
}

/// A fitted mixture; components that received no samples are absent.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Gmm {
    components: Vec<Component>,
}

impl Gmm {
    /// Fit a fresh model, clustering `samples` by principal-axis splitting.
    ///
    /// Returns `None` when there are no samples.
    pub(crate) fn fit(samples: &[Color]) -> Option<Self> {
        if samples.is_empty() {
            return None;
        }
        let samples = to_vectors(samples);
        let clusters = split_clusters(&samples);
        Some(Self::learn(&samples, &clusters))
    }

    /// Refit using this model's components as the starting assignment.
    ///
    /// Returns `None` when there are no samples.
    pub(crate) fn refit(&self, samples: &[Color]) -> Option<Self> {
        if samples.is_empty() {
            return None;
        }
        let samples = to_vectors(samples);
        let mut clusters = vec![Vec::new(); self.components.len().max(1)];
        for (i, c) in samples.iter().enumerate() {
            clusters[self.most_likely_component(c)].push(i);
        }
        Some(Self::learn(&samples, &clusters))
    }

    /// Mixture density at `c` (the shared `(2π)^-3/2` factor is omitted).
    pub(crate) fn probability(&self, c: Color) -> f64 {
        let c = Vector3::from(c);
        self.components
            .iter()
            .map(|comp| comp.weight * comp.density(&c))
            .sum()
    }

    /// Negative log-likelihood of `c`, finite even when the density underflows.
    pub(crate) fn penalty(&self, c: Color) -> f64 {
        let p = self.probability(c);
        debug_assert!(p.is_finite(), "mixture density {p} at {c:?}");
        -p.max(f64::MIN_POSITIVE).ln()
    }

    #[cfg(test)]
    pub(crate) fn component_count(&self) -> usize {
        self.components.len()
    }

    fn most_likely_component(&self, c: &Vector3<f64>) -> usize {
        let mut best = 0;
        let mut best_density = f64::NEG_INFINITY;
        for (k, comp) in self.components.iter().enumerate() {
            let density = comp.density(c);
            if density > best_density {
                best_density = density;
                best = k;
            }
        }
        best
    }

    #[allow(clippy::cast_precision_loss)]
    fn learn(samples: &[Vector3<f64>], clusters: &[Vec<usize>]) -> Self {
        let total = samples.len() as f64;
        let components = clusters
            .iter()
            .filter(|members| !members.is_empty())
            .filter_map(|members| {
                let (mean, covariance) = moments(samples, members);
                let component = Component::new(members.len() as f64 / total, mean, covariance);
                if component.is_none() {
                    tracing::warn!(samples = members.len(), "dropping degenerate color component");
                }
                component
            })
            .collect();
        Self { components }
    }
}

fn to_vectors(samples: &[Color]) -> Vec<Vector3<f64>> {
    samples.iter().map(|&c| Vector3::from(c)).collect()
}

/// Mean and covariance of `members`, summed around the mean in a second pass.
#[allow(clippy::cast_precision_loss)]
fn moments(samples: &[Vector3<f64>], members: &[usize]) -> (Vector3<f64>, Matrix3<f64>) {
    let n = members.len() as f64;
    let mean = members
        .iter()
        .fold(Vector3::<f64>::zeros(), |acc, &i| acc + samples[i])
        / n;
    let covariance = members.iter().fold(Matrix3::<f64>::zeros(), |acc, &i| {
        let d = samples[i] - mean;
        acc + d * d.transpose()
    }) / n;
    (mean, covariance)
}

/// Orchard-Bouman style clustering: split the cluster with the largest
/// principal variance at its mean, until [`COMPONENTS`] clusters exist or
/// nothing is left to split. Returns the sample indices of every cluster.
fn split_clusters(samples: &[Vector3<f64>]) -> Vec<Vec<usize>> {
    let mut clusters: Vec<Vec<usize>> = vec![(0..samples.len()).collect()];

    while clusters.len() < COMPONENTS {
        let mut best: Option<(usize, f64, Vector3<f64>, Vector3<f64>)> = None;
        for (k, members) in clusters.iter().enumerate() {
            if members.len() < 2 {
                continue;
            }
            let (mean, covariance) = moments(samples, members);
            let (value, axis) = principal_axis(covariance);
            if value > MIN_SPLIT_VARIANCE && best.is_none_or(|(_, v, _, _)| value > v) {
                best = Some((k, value, axis, mean));
            }
        }

        let Some((k, _, axis, mean)) = best else {
            break;
        };
        let (low, high): (Vec<usize>, Vec<usize>) = clusters[k]
            .iter()
            .partition(|&&i| (samples[i] - mean).dot(&axis) <= 0.0);
        if low.is_empty() || high.is_empty() {
            break;
        }
        clusters[k] = low;
        clusters.push(high);
    }
    clusters
}

/// Largest eigenvalue of a symmetric matrix and its unit eigenvector.
fn principal_axis(m: Matrix3<f64>) -> (f64, Vector3<f64>) {
    let eigen = SymmetricEigen::new(m);
    let k = eigen.eigenvalues.imax();
    (eigen.eigenvalues[k], eigen.eigenvectors.column(k).into_owned())
}
