use std::fs::File;
use std::ops::Index;
use std::path::Path;
use std::sync::Arc;

use indexmap::IndexMap;
use nalgebra::Vector3;
use parquet::errors::ParquetError;
use parquet::file::reader::{FileReader, SerializedFileReader};
use parquet::record::{Field, Row};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use thiserror::Error;
use tracing::debug;

use crate::four_momentum::FourMomentum;

#[derive(Error, Debug)]
pub enum DatasetError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Parquet(#[from] ParquetError),
    #[error("Required column {column:?} is missing")]
    MissingColumn { column: String },
    #[error("Column {column:?} has an unsupported type")]
    ColumnType { column: String },
    #[error("Final-state columns have mismatched lengths in row {row}")]
    MismatchedLengths { row: usize },
}

/// A single event: the four-momenta of every particle, the beam polarization vector and a
/// weight.
///
/// By convention the beam is stored at index 0 and the final-state particles follow it.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub p4s: Vec<FourMomentum>,
    pub eps: Vector3<f64>,
    pub weight: f64,
}

impl Default for Event {
    fn default() -> Self {
        Self {
            p4s: Vec::new(),
            eps: Vector3::zeros(),
            weight: 1.0,
        }
    }
}

impl Event {
    /// Sum of the four-momenta at the given indices.
    pub fn sum_of(&self, indices: &[usize]) -> FourMomentum {
        indices.iter().map(|i| &self.p4s[*i]).sum()
    }
}

#[derive(Debug, Clone, Default)]
pub struct Dataset {
    pub events: Vec<Arc<Event>>,
}

impl Index<usize> for Dataset {
    type Output = Event;

    fn index(&self, index: usize) -> &Self::Output {
        &self.events[index]
    }
}

impl FromIterator<Event> for Dataset {
    fn from_iter<T: IntoIterator<Item = Event>>(iter: T) -> Self {
        Self {
            events: iter.into_iter().map(Arc::new).collect(),
        }
    }
}

impl Dataset {
    pub fn new(events: Vec<Event>) -> Self {
        events.into_iter().collect()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Event> {
        self.events.iter().map(AsRef::as_ref)
    }

    /// The first event with fewer than `n` particles, as `(index, particles)`.
    pub fn find_short_event(&self, n: usize) -> Option<(usize, usize)> {
        self.iter()
            .enumerate()
            .find(|(_, event)| event.p4s.len() < n)
            .map(|(index, event)| (index, event.p4s.len()))
    }

    pub fn weights(&self) -> Vec<f64> {
        self.iter().map(|event| event.weight).collect()
    }

    /// The sum of event weights, accumulated in event order.
    pub fn weighted_len(&self) -> f64 {
        self.iter().map(|event| event.weight).sum()
    }

    /// Maps `f` over every event in parallel, returning results in event order.
    pub fn par_map<T, F>(&self, f: F) -> Vec<T>
    where
        T: Send,
        F: Fn(&Event) -> T + Sync + Send,
    {
        self.events.par_iter().map(|event| f(event)).collect()
    }

    /// Indices of a bootstrap resample: `len()` draws with replacement from a stream seeded by
    /// `seed`. The same seed always yields the same indices.
    pub fn bootstrap_indices(&self, seed: u64) -> Vec<usize> {
        if self.is_empty() {
            return Vec::new();
        }
        let mut rng = StdRng::seed_from_u64(seed);
        let mut indices: Vec<usize> = (0..self.len())
            .map(|_| rng.gen_range(0..self.len()))
            .collect();
        indices.sort_unstable();
        indices
    }

    /// A bootstrap resample of this dataset. Events are shared with the original, not copied.
    pub fn bootstrap(&self, seed: u64) -> Self {
        Self {
            events: self
                .bootstrap_indices(seed)
                .into_iter()
                .map(|i| Arc::clone(&self.events[i]))
                .collect(),
        }
    }

    /// Open a `GlueX` flat-tree Parquet file by `path`. `polarized` is a flag which is `true` if
    /// the data file has polarization information stored in the `"Px_Beam"` and `"Py_Beam"`
    /// columns, in which case the beam is taken to be a massless photon along the $`z`$-axis
    /// with energy `"E_Beam"`.
    ///
    /// The beam four-momentum is stored at index 0 of every [`Event`], followed by the
    /// final-state particles in file order.
    ///
    /// # Errors
    ///
    /// Will raise [`DatasetError`] if the file cannot be read, a required column is missing, or
    /// a column holds data of an unexpected type.
    pub fn from_parquet<P: AsRef<Path>>(path: P, polarized: bool) -> Result<Self, DatasetError> {
        let file = File::open(path.as_ref())?;
        let reader = SerializedFileReader::new(file)?;
        let n_rows = usize::try_from(reader.metadata().file_metadata().num_rows()).unwrap_or(0);
        let mut events = Vec::with_capacity(n_rows);
        for (i, row) in reader.get_row_iter(None)?.enumerate() {
            events.push(read_gluex_row(&row?, i, polarized)?);
        }
        debug!(
            "Read {} events from {}",
            events.len(),
            path.as_ref().display()
        );
        Ok(Self::new(events))
    }
}

fn field_to_f64(column: &str, field: &Field) -> Result<f64, DatasetError> {
    match field {
        Field::Float(value) => Ok(f64::from(*value)),
        Field::Double(value) => Ok(*value),
        Field::Int(value) => Ok(f64::from(*value)),
        #[allow(clippy::cast_precision_loss)]
        Field::Long(value) => Ok(*value as f64),
        _ => Err(DatasetError::ColumnType {
            column: column.to_string(),
        }),
    }
}

fn read_gluex_row(row: &Row, index: usize, polarized: bool) -> Result<Event, DatasetError> {
    let columns: IndexMap<&str, &Field> = row
        .get_column_iter()
        .map(|(name, field)| (name.as_str(), field))
        .collect();
    let get = |column: &str| {
        columns
            .get(column)
            .copied()
            .ok_or_else(|| DatasetError::MissingColumn {
                column: column.to_string(),
            })
    };
    let scalar = |column: &str| get(column).and_then(|field| field_to_f64(column, field));
    let list = |column: &str| match get(column)? {
        Field::ListInternal(list) => list
            .elements()
            .iter()
            .map(|field| field_to_f64(column, field))
            .collect::<Result<Vec<f64>, DatasetError>>(),
        _ => Err(DatasetError::ColumnType {
            column: column.to_string(),
        }),
    };

    let e_beam = scalar("E_Beam")?;
    let px_beam = scalar("Px_Beam")?;
    let py_beam = scalar("Py_Beam")?;
    let pz_beam = scalar("Pz_Beam")?;
    let (beam, eps) = if polarized {
        (
            FourMomentum::new(e_beam, 0.0, 0.0, e_beam),
            Vector3::new(px_beam, py_beam, 0.0),
        )
    } else {
        (
            FourMomentum::new(e_beam, px_beam, py_beam, pz_beam),
            Vector3::zeros(),
        )
    };
    let weight = scalar("Weight")?;
    let e_fs = list("E_FinalState")?;
    let px_fs = list("Px_FinalState")?;
    let py_fs = list("Py_FinalState")?;
    let pz_fs = list("Pz_FinalState")?;
    if px_fs.len() != e_fs.len() || py_fs.len() != e_fs.len() || pz_fs.len() != e_fs.len() {
        return Err(DatasetError::MismatchedLengths { row: index });
    }
    let mut p4s = Vec::with_capacity(e_fs.len() + 1);
    p4s.push(beam);
    p4s.extend(
        e_fs.iter()
            .zip(&px_fs)
            .zip(&py_fs)
            .zip(&pz_fs)
            .map(|(((e, px), py), pz)| FourMomentum::new(*e, *px, *py, *pz)),
    );
    Ok(Event { p4s, eps, weight })
}
