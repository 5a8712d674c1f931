use chrono::{Duration, NaiveDate};
use ndarray::Array3;
use wbgt_rust::math::{to_radian_grid, zenith_fields, NO_SUN_SENTINEL};
use wbgt_rust::parallel::{map_time_blocks_concat, with_thread_pool, DAY_BLOCK};

#[test]
fn test_concat_blocks_in_time_order() {
    let result: Result<Array3<f64>, ()> = map_time_blocks_concat(50, (2, 3), DAY_BLOCK, |range| {
        Ok(Array3::from_shape_fn((range.len(), 2, 3), |(k, _, _)| (range.start + k) as f64))
    });
    let array = result.unwrap();
    assert_eq!(array.dim(), (50, 2, 3));
    for t in 0..50 {
        assert_eq!(array[[t, 1, 2]], t as f64);
    }
}

#[test]
fn test_custom_thread_pool() {
    let threads = with_thread_pool(2, rayon::current_num_threads).unwrap();
    assert_eq!(threads, 2);
}

#[test]
fn test_zenith_fields_independent_of_block_size() {
    let grid = to_radian_grid(&[-45.0, -20.0, 10.0], &[115.0, 150.0]);
    let start = NaiveDate::from_ymd_opt(2030, 6, 1)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap();
    let times: Vec<_> = (0..72).map(|h| start + Duration::hours(h)).collect();

    let daily = zenith_fields(&times, &grid, 1.0, DAY_BLOCK);
    let odd = zenith_fields(&times, &grid, 1.0, 7);
    assert_eq!(daily.cza, odd.cza);
    assert_eq!(daily.czda, odd.czda);
    assert_eq!(daily.cza.dim(), (72, 3, 2));

    assert!(daily.cza.iter().all(|c| (-1.0..=1.0).contains(c)));
    assert!(daily.czda.iter().all(|&c| c > 0.0 || c == NO_SUN_SENTINEL));
    // Some hours of the day are dark everywhere on this grid
    assert!(daily.cza.iter().any(|&c| c < 0.0));
    assert!(daily.cza.iter().any(|&c| c > 0.5));
}
