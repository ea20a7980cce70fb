// handlers/protected/expression_functions.rs - /api/v1/expression-functions

use std::collections::BTreeMap;

use crate::expression::functions::{by_category, Category, FunctionInfo};
use crate::middleware::{ApiResponse, ApiResult};

/// Category name -> functions of that category
pub fn grouped() -> BTreeMap<&'static str, Vec<&'static FunctionInfo>> {
    Category::ALL
        .iter()
        .map(|category| (category.as_str(), by_category(*category)))
        .collect()
}

pub async fn list() -> ApiResult<BTreeMap<&'static str, Vec<&'static FunctionInfo>>> {
    Ok(ApiResponse::success(grouped()))
}

pub async fn flat() -> ApiResult<Vec<&'static FunctionInfo>> {
    let functions = Category::ALL.iter().flat_map(|category| by_category(*category)).collect();
    Ok(ApiResponse::success(functions))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_category_is_listed() {
        let groups = grouped();
        assert_eq!(groups.keys().copied().collect::<Vec<_>>(), vec!["Logic", "Math", "Statistics"]);
        assert!(groups["Math"].iter().any(|f| f.name == "sqrt"));
        assert!(groups["Statistics"].iter().all(|f| f.is_statistic()));
    }
}
