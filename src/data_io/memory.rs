use super::{Field, FieldSource, Grid, InputVariable, ReaderError};
use chrono::NaiveDateTime;
use std::collections::BTreeMap;

/// Field source backed by arrays already held in memory.
#[derive(Debug, Clone)]
pub struct MemorySource {
    grid: Grid,
    fields: BTreeMap<InputVariable, Field>,
}

impl MemorySource {
    pub fn new(grid: Grid) -> Self {
        Self {
            grid,
            fields: BTreeMap::new(),
        }
    }

    /// Register a whole-archive field; its spatial shape must match the grid.
    pub fn insert(&mut self, variable: InputVariable, field: Field) -> Result<(), ReaderError> {
        let (_, ny, nx) = field.shape();
        if (ny, nx) != self.grid.shape() {
            return Err(ReaderError::GridMismatch(variable.name().to_string()));
        }
        self.fields.insert(variable, field);
        Ok(())
    }

    pub fn with(mut self, variable: InputVariable, field: Field) -> Result<Self, ReaderError> {
        self.insert(variable, field)?;
        Ok(self)
    }
}

impl FieldSource for MemorySource {
    fn available(&self) -> Vec<InputVariable> {
        self.fields.keys().copied().collect()
    }

    fn grid(&self) -> Result<Grid, ReaderError> {
        Ok(self.grid.clone())
    }

    fn load(
        &self,
        variable: InputVariable,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<Field, ReaderError> {
        self.fields
            .get(&variable)
            .map(|field| field.select(start, end))
            .ok_or_else(|| ReaderError::MissingVariable(variable.name().to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time_utils::Calendar;
    use chrono::NaiveDate;
    use ndarray::Array3;

    #[test]
    fn test_insert_checks_grid_shape() {
        let grid = Grid::new(vec![-30.0, -29.9], vec![150.0]);
        let t0 = NaiveDate::from_ymd_opt(2030, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        let field = Field::new("tas", "K", Calendar::Standard, vec![t0], Array3::zeros((1, 1, 1))).unwrap();

        let mut source = MemorySource::new(grid);
        assert!(matches!(
            source.insert(InputVariable::Tas, field),
            Err(ReaderError::GridMismatch(_))
        ));
        assert!(source.available().is_empty());
    }
}
