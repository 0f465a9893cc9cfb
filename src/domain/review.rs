//! Review aggregates.

/// Recomputes `(average_rating, review_count)` from the full rating set.
/// Always a full recompute, never an incremental update; an empty set
/// yields an average of 0.
pub fn rating_summary(ratings: &[i16]) -> (f64, i32) {
    if ratings.is_empty() {
        return (0.0, 0);
    }
    let sum: i64 = ratings.iter().map(|r| i64::from(*r)).sum();
    (sum as f64 / ratings.len() as f64, ratings.len() as i32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_set() {
        assert_eq!(rating_summary(&[]), (0.0, 0));
    }

    #[test]
    fn test_mean_and_count() {
        assert_eq!(rating_summary(&[4]), (4.0, 1));
        assert_eq!(rating_summary(&[5, 4, 3]), (4.0, 3));
        let (avg, count) = rating_summary(&[5, 4]);
        assert_eq!(count, 2);
        assert!((avg - 4.5).abs() < f64::EPSILON);
    }
}
