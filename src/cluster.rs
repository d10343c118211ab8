use tracing::{debug, info};

use crate::flatbuffer::ModelView;
use crate::graph::Graph;
use crate::tensor::{decode_elements, encode_elements};
use crate::{Error, Result};

/// Cluster the kernel weights of every parameterised operator into
/// `n_clusters` centroids and overwrite the backing buffers in place.
///
/// Each weight is replaced by the centroid of its cluster, rounded
/// half-to-even to a 32-bit integer and narrowed to the tensor's element
/// type with saturation. The serialized model keeps its exact length.
pub(crate) fn cluster_weights(bytes: &mut [u8], graph: &Graph, n_clusters: usize) -> Result<()> {
    if n_clusters == 0 {
        return Err(Error::InvalidArgument(
            "weight_clusters must be positive".to_string(),
        ));
    }
    info!(clusters = n_clusters, "clustering weights");

    let kernels = discover_kernels(bytes, graph)?;
    for (tensor_id, region) in kernels {
        let tensor = &graph.tensors[tensor_id];
        let values = decode_elements(tensor, &bytes[region.clone()])?;
        let clustered = cluster_values(&values, n_clusters);
        encode_elements(tensor, &clustered, &mut bytes[region])?;
        debug!(
            tensor = tensor_id,
            elements = tensor.element_count(),
            "overwrote kernel buffer"
        );
    }
    Ok(())
}

/// Kernel tensors of parameterised operators plus the absolute byte range
/// backing each one.
fn discover_kernels(
    bytes: &[u8],
    graph: &Graph,
) -> Result<Vec<(usize, std::ops::Range<usize>)>> {
    let view = ModelView::parse(bytes)?;
    let mut kernels = Vec::new();
    for op in &graph.operators {
        let Some(tensor_id) = op.kernel_input() else {
            continue;
        };
        let tensor = &graph.tensors[tensor_id];
        let region = view.buffer_region(tensor.buffer)?.ok_or_else(|| {
            Error::UnwritableBuffer(format!(
                "kernel tensor {} has no stored data to rewrite",
                tensor_id
            ))
        })?;
        kernels.push((tensor_id, region));
    }
    Ok(kernels)
}

/// Replace every value with its rounded cluster centroid
fn cluster_values(values: &[i64], n_clusters: usize) -> Vec<i64> {
    let samples: Vec<f64> = values.iter().map(|&v| v as f64).collect();
    let (assignments, centroids) = lloyd_kmeans(&samples, n_clusters);
    assignments
        .iter()
        .map(|&cluster| {
            let rounded = centroids[cluster].round_ties_even();
            rounded.clamp(i32::MIN as f64, i32::MAX as f64) as i64
        })
        .collect()
}

/// Plain Lloyd iteration over scalar samples.
///
/// Centroids start at evenly spaced positions of the sorted sample list,
/// which makes the whole pass deterministic. Clusters that lose all
/// members keep their previous centroid.
fn lloyd_kmeans(samples: &[f64], k: usize) -> (Vec<usize>, Vec<f64>) {
    const MAX_ITERATIONS: usize = 300;

    if samples.is_empty() {
        return (Vec::new(), vec![0.0; k]);
    }

    let mut sorted = samples.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mut centroids: Vec<f64> = (0..k)
        .map(|j| {
            if k == 1 {
                sorted[sorted.len() / 2]
            } else {
                sorted[j * (sorted.len() - 1) / (k - 1)]
            }
        })
        .collect();

    let nearest = |centroids: &[f64], sample: f64| -> usize {
        let mut best = 0;
        let mut best_distance = f64::INFINITY;
        for (index, &centroid) in centroids.iter().enumerate() {
            let distance = (sample - centroid).abs();
            if distance < best_distance {
                best = index;
                best_distance = distance;
            }
        }
        best
    };

    let mut assignments: Vec<usize> = samples.iter().map(|&s| nearest(&centroids, s)).collect();
    for _ in 0..MAX_ITERATIONS {
        let mut sums = vec![0.0; k];
        let mut counts = vec![0usize; k];
        for (&sample, &cluster) in samples.iter().zip(&assignments) {
            sums[cluster] += sample;
            counts[cluster] += 1;
        }
        for (cluster, centroid) in centroids.iter_mut().enumerate() {
            if counts[cluster] > 0 {
                *centroid = sums[cluster] / counts[cluster] as f64;
            }
        }

        let next: Vec<usize> = samples.iter().map(|&s| nearest(&centroids, s)).collect();
        if next == assignments {
            break;
        }
        assignments = next;
    }
    (assignments, centroids)
}
