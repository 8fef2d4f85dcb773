//! Training statistics and summary sinks.
//!
//! Trainers fill a [`Stat`] map during each episode. [`write_stat`] sends
//! scalars to `scalar_summary` and arrays (the communication gate) to
//! `image_summary` of any [`SummaryWriter`]. [`CsvSummaryWriter`] writes
//! both to CSV files that plot easily.

use ndarray::Array2;
use std::collections::BTreeMap;
use std::fs::{create_dir_all, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::Result;

#[derive(Clone, Debug, PartialEq)]
pub enum StatValue {
    Scalar(f32),
    Array(Array2<f32>),
}

/// Named values recorded during one episode.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Stat {
    values: BTreeMap<String, StatValue>,
}

impl Stat {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_scalar(&mut self, tag: &str, value: f32) {
        self.values.insert(tag.to_string(), StatValue::Scalar(value));
    }

    pub fn insert_array(&mut self, tag: &str, value: Array2<f32>) {
        self.values.insert(tag.to_string(), StatValue::Array(value));
    }

    pub fn get(&self, tag: &str) -> Option<&StatValue> {
        self.values.get(tag)
    }

    /// The scalar under `tag`, if there is one.
    pub fn scalar(&self, tag: &str) -> Option<f32> {
        match self.values.get(tag) {
            Some(StatValue::Scalar(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &StatValue)> {
        self.values.iter()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// A sink for per-episode statistics.
pub trait SummaryWriter {
    fn scalar_summary(&mut self, tag: &str, value: f32, step: usize) -> Result<()>;

    fn image_summary(&mut self, tag: &str, image: &Array2<f32>, step: usize) -> Result<()>;

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Route every entry of `stat` to the matching summary of `writer`.
pub fn write_stat(writer: &mut dyn SummaryWriter, stat: &Stat, step: usize) -> Result<()> {
    for (tag, value) in stat.iter() {
        match value {
            StatValue::Scalar(v) => writer.scalar_summary(tag, *v, step)?,
            StatValue::Array(a) => writer.image_summary(tag, a, step)?,
        }
    }
    writer.flush()
}

/// Writes `scalars.csv` and `images.csv` under `log_dir/run_name`.
pub struct CsvSummaryWriter {
    log_dir: PathBuf,
    scalar_writer: BufWriter<File>,
    image_writer: BufWriter<File>,
}

impl CsvSummaryWriter {
    pub fn new<P: AsRef<Path>>(log_dir: P, run_name: &str) -> Result<Self> {
        let log_path = log_dir.as_ref().join(run_name);
        create_dir_all(&log_path)?;

        let mut scalar_writer = BufWriter::new(File::create(log_path.join("scalars.csv"))?);
        let mut image_writer = BufWriter::new(File::create(log_path.join("images.csv"))?);
        writeln!(scalar_writer, "step,tag,value,wall_time")?;
        writeln!(image_writer, "step,tag,rows,cols,values,wall_time")?;

        Ok(CsvSummaryWriter {
            log_dir: log_path,
            scalar_writer,
            image_writer,
        })
    }

    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }

    fn wall_time() -> f64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0)
    }
}

impl SummaryWriter for CsvSummaryWriter {
    fn scalar_summary(&mut self, tag: &str, value: f32, step: usize) -> Result<()> {
        writeln!(self.scalar_writer, "{},{},{},{}", step, tag, value, Self::wall_time())?;
        Ok(())
    }

    fn image_summary(&mut self, tag: &str, image: &Array2<f32>, step: usize) -> Result<()> {
        let values: Vec<String> = image.iter().map(|v| v.to_string()).collect();
        writeln!(
            self.image_writer,
            "{},{},{},{},{},{}",
            step,
            tag,
            image.nrows(),
            image.ncols(),
            values.join(" "),
            Self::wall_time()
        )?;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.scalar_writer.flush()?;
        self.image_writer.flush()?;
        Ok(())
    }
}
