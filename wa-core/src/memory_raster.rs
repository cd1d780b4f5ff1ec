use crate::error::{Result, WaError};
use crate::raster::{Grid, RasterAdapter};
use std::cell::RefCell;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::rc::Rc;

/// Raster adapter holding grids in memory, keyed by path.
///
/// Cheaply cloneable; clones share the same store. Used for synthetic
/// scenarios and tests where no files should be touched.
#[derive(Clone, Default)]
pub struct MemoryRaster {
    grids: Rc<RefCell<HashMap<PathBuf, Grid>>>,
}

impl MemoryRaster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, path: impl Into<PathBuf>, grid: Grid) {
        self.grids.borrow_mut().insert(path.into(), grid);
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.grids.borrow().contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.grids.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.grids.borrow().is_empty()
    }
}

impl RasterAdapter for MemoryRaster {
    fn open(&self, path: &Path) -> Result<Grid> {
        self.grids
            .borrow()
            .get(path)
            .cloned()
            .map(Grid::mask_nodata)
            .ok_or_else(|| WaError::Raster(format!("no grid stored at {}", path.display())))
    }

    fn write(&self, path: &Path, grid: &Grid) -> Result<()> {
        self.insert(path, grid.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raster::GeoTransform;
    use ndarray::{array, Array2};

    fn transform(size: f64) -> GeoTransform {
        GeoTransform {
            origin_x: 10.0,
            origin_y: 20.0,
            pixel_width: size,
            pixel_height: size,
        }
    }

    #[test]
    fn test_clones_share_store() {
        let rasters = MemoryRaster::new();
        let other = rasters.clone();
        rasters.insert("a.tif", Grid::new(array![[1.0]], transform(1.0)));
        assert!(other.contains(Path::new("a.tif")));
        assert!(other.open(Path::new("missing.tif")).is_err());
    }

    #[test]
    fn test_match_to_reference_writes_same_names() {
        let rasters = MemoryRaster::new();
        rasters.insert("ref/lu.tif", Grid::new(Array2::zeros((2, 2)), transform(0.5)));
        rasters.insert("raw/p_2009_01.tif", Grid::new(array![[7.0]], transform(1.0)));
        let written = rasters
            .match_to_reference(
                Path::new("ref/lu.tif"),
                &[PathBuf::from("raw/p_2009_01.tif")],
                Path::new("out"),
            )
            .unwrap();
        assert_eq!(written, vec![PathBuf::from("out/p_2009_01.tif")]);
        let grid = rasters.open(&written[0]).unwrap();
        assert_eq!(grid.data, Array2::from_elem((2, 2), 7.0));
    }

    #[test]
    fn test_open_masks_nodata() {
        let rasters = MemoryRaster::new();
        let mut grid = Grid::new(array![[1.0, -1.0]], transform(1.0));
        grid.nodata = Some(-1.0);
        rasters.insert("m.tif", grid);
        let opened = rasters.open(Path::new("m.tif")).unwrap();
        assert!(opened.data[[0, 1]].is_nan());
    }
}
