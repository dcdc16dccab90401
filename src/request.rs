use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct Pagination {
    #[serde(default = "first_page")]
    pub page: i64,
    #[serde(default = "page_size")]
    pub size: i64,
}

fn first_page() -> i64 {
    1
}

fn page_size() -> i64 {
    20
}
