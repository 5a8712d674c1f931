use ndarray::{Array3, Axis};
use rayon::prelude::*;
use std::ops::Range;
use tracing::debug;

/// Time steps per block: one day of hourly data
pub const DAY_BLOCK: usize = 24;

/// Split `0..n_times` into consecutive ranges of at most `block_size` steps.
///
/// A zero block size is treated as one block covering everything.
pub fn time_blocks(n_times: usize, block_size: usize) -> Vec<Range<usize>> {
    let block_size = if block_size == 0 { n_times.max(1) } else { block_size };
    (0..n_times)
        .step_by(block_size)
        .map(|start| start..(start + block_size).min(n_times))
        .collect()
}

/// Evaluate `f` on every time block in parallel.
///
/// Results come back in block order whatever order the blocks ran in. The
/// first error aborts the map and is returned.
pub fn map_time_blocks<T, E, F>(n_times: usize, block_size: usize, f: F) -> Result<Vec<T>, E>
where
    T: Send,
    E: Send,
    F: Fn(Range<usize>) -> Result<T, E> + Sync + Send,
{
    let blocks = time_blocks(n_times, block_size);
    debug!(
        "Mapping {} time steps over {} blocks on {} threads",
        n_times,
        blocks.len(),
        rayon::current_num_threads()
    );
    blocks.into_par_iter().map(f).collect()
}

/// Block-parallel map whose blocks are `(time, lat, lon)` arrays, joined along time.
pub fn map_time_blocks_concat<E, F>(
    n_times: usize,
    shape: (usize, usize),
    block_size: usize,
    f: F,
) -> Result<Array3<f64>, E>
where
    E: Send,
    F: Fn(Range<usize>) -> Result<Array3<f64>, E> + Sync + Send,
{
    let blocks = map_time_blocks(n_times, block_size, f)?;
    if blocks.is_empty() {
        return Ok(Array3::zeros((0, shape.0, shape.1)));
    }
    let mut result = Array3::zeros((n_times, shape.0, shape.1));
    let mut offset = 0;
    for block in blocks {
        let len = block.len_of(Axis(0));
        result
            .slice_mut(ndarray::s![offset..offset + len, .., ..])
            .assign(&block);
        offset += len;
    }
    Ok(result)
}

/// Run `f` inside a dedicated pool of `num_threads` workers.
///
/// Zero threads runs `f` on the global rayon pool.
pub fn with_thread_pool<R, F>(num_threads: usize, f: F) -> Result<R, rayon::ThreadPoolBuildError>
where
    R: Send,
    F: FnOnce() -> R + Send,
{
    if num_threads == 0 {
        return Ok(f());
    }
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(num_threads)
        .build()?;
    Ok(pool.install(f))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_time_blocks_cover_axis() {
        let blocks = time_blocks(50, DAY_BLOCK);
        assert_eq!(blocks, vec![0..24, 24..48, 48..50]);
        assert!(time_blocks(0, DAY_BLOCK).is_empty());
    }

    #[test]
    fn test_zero_block_size_is_single_block() {
        assert_eq!(time_blocks(10, 0), vec![0..10]);
    }

    #[test]
    fn test_map_preserves_block_order() {
        let starts: Result<Vec<usize>, ()> = map_time_blocks(100, 7, |r| Ok(r.start));
        let starts = starts.unwrap();
        assert_eq!(starts, (0..100).step_by(7).collect::<Vec<_>>());
    }

    #[test]
    fn test_map_fails_fast() {
        let result: Result<Vec<usize>, String> = map_time_blocks(48, 24, |r| {
            if r.start == 24 {
                Err("block failed".to_string())
            } else {
                Ok(r.len())
            }
        });
        assert_eq!(result, Err("block failed".to_string()));
    }
}
