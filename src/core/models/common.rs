use serde::{Deserialize, Deserializer};

pub struct Pagination {
    pub limit: i64,
    pub offset: i64,
}

impl Pagination {
    pub fn new(limit: i64, offset: Option<i64>) -> Self {
        Self {
            limit,
            offset: offset.unwrap_or(0),
        }
    }

    /// 1-based page number to limit/offset; out of range values are clamped.
    pub fn page(page: i64, size: i64) -> Self {
        let size = size.clamp(1, 100);
        Self::new(size, Some((page.max(1) - 1) * size))
    }
}

/// Distinguishes an absent key (`None`) from an explicit `null` (`Some(None)`).
pub fn double_option<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}
