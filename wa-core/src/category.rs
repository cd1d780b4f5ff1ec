//! Land-use category aggregation.
//!
//! A [`CategoryMap`] sorts integer land-use class codes into the four WA+
//! categories. Every sheet uses the same map, so a pixel contributes to at
//! most one category everywhere.

use crate::error::{Result, WaError};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Category {
    Protected,
    Utilized,
    Modified,
    Managed,
}

impl Category {
    pub const ALL: [Category; 4] = [
        Category::Protected,
        Category::Utilized,
        Category::Modified,
        Category::Managed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Protected => "Protected",
            Category::Utilized => "Utilized",
            Category::Modified => "Modified",
            Category::Managed => "Managed",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Value per land-use category.
pub type CategoryValues = BTreeMap<Category, f64>;

/// Mapping of category to the set of land-use class codes it covers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "BTreeMap<Category, BTreeSet<i32>>", into = "BTreeMap<Category, BTreeSet<i32>>")]
pub struct CategoryMap {
    classes: BTreeMap<Category, BTreeSet<i32>>,
    lookup: BTreeMap<i32, Category>,
}

impl CategoryMap {
    /// Build a map, rejecting class codes that appear in more than one category.
    pub fn new(classes: BTreeMap<Category, BTreeSet<i32>>) -> Result<Self> {
        let mut lookup = BTreeMap::new();
        for (category, codes) in &classes {
            for code in codes {
                if let Some(other) = lookup.insert(*code, *category) {
                    return Err(WaError::Config(format!(
                        "land-use class {code} is listed under both {other} and {category}"
                    )));
                }
            }
        }
        Ok(CategoryMap { classes, lookup })
    }

    /// The standard WA+ sheet 1 grouping of the 80 land-use classes.
    pub fn wa_plus() -> Self {
        let classes: BTreeMap<Category, BTreeSet<i32>> = [
            (Category::Protected, (1..=16).collect()),
            (Category::Utilized, (17..=29).collect()),
            (Category::Modified, (30..=52).collect()),
            (Category::Managed, (53..=80).collect()),
        ]
        .into_iter()
        .collect();
        let lookup = classes
            .iter()
            .flat_map(|(cat, codes)| codes.iter().map(move |c| (*c, *cat)))
            .collect();
        CategoryMap { classes, lookup }
    }

    pub fn classes(&self, category: Category) -> Option<&BTreeSet<i32>> {
        self.classes.get(&category)
    }

    pub fn category_of(&self, code: f64) -> Option<Category> {
        if !code.is_finite() {
            return None;
        }
        self.lookup.get(&(code.round() as i32)).copied()
    }

    /// Boolean mask of the pixels whose class code belongs to `category`.
    pub fn mask(&self, lu: &Array2<f64>, category: Category) -> Array2<bool> {
        lu.mapv(|code| self.category_of(code) == Some(category))
    }

    /// Sum `data` over each category's pixels, ignoring NaN.
    ///
    /// Pixels whose code belongs to no category contribute nothing. Every
    /// category of the map is present in the result, with 0.0 when empty.
    pub fn masked_sum(&self, data: &Array2<f64>, lu: &Array2<f64>) -> CategoryValues {
        let mut sums: CategoryValues = self.classes.keys().map(|c| (*c, 0.0)).collect();
        for (value, code) in data.iter().zip(lu.iter()) {
            if value.is_nan() {
                continue;
            }
            if let Some(category) = self.category_of(*code) {
                *sums.entry(category).or_insert(0.0) += value;
            }
        }
        sums
    }

    /// Mean of `data` over each category's pixels, ignoring NaN. NaN for an empty category.
    pub fn masked_mean(&self, data: &Array2<f64>, lu: &Array2<f64>) -> CategoryValues {
        let mut acc: BTreeMap<Category, (f64, usize)> =
            self.classes.keys().map(|c| (*c, (0.0, 0))).collect();
        for (value, code) in data.iter().zip(lu.iter()) {
            if value.is_nan() {
                continue;
            }
            if let Some(category) = self.category_of(*code) {
                let entry = acc.entry(category).or_insert((0.0, 0));
                entry.0 += value;
                entry.1 += 1;
            }
        }
        acc.into_iter()
            .map(|(c, (sum, n))| (c, if n > 0 { sum / n as f64 } else { f64::NAN }))
            .collect()
    }
}

impl TryFrom<BTreeMap<Category, BTreeSet<i32>>> for CategoryMap {
    type Error = WaError;

    fn try_from(classes: BTreeMap<Category, BTreeSet<i32>>) -> Result<Self> {
        CategoryMap::new(classes)
    }
}

impl From<CategoryMap> for BTreeMap<Category, BTreeSet<i32>> {
    fn from(map: CategoryMap) -> Self {
        map.classes
    }
}

impl Default for CategoryMap {
    fn default() -> Self {
        CategoryMap::wa_plus()
    }
}
