use std::path::PathBuf;

use csv_core::WriteResult;

#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum Format {
    Table,
    Jsonl,
    Csv,
}

#[derive(clap::Parser, Clone, Debug)]
#[group(id = "output::Args")]
pub struct Args {
    /// Write to this file instead of the terminal. An existing file is truncated.
    #[arg(long, short = 'o')]
    output: Option<PathBuf>,
    #[arg(long, short='f', value_enum, default_value_t = Format::Table)]
    format: Format,
}

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("could not open the specified output file at {1:?}")]
    OpenOutputFile(#[source] std::io::Error, PathBuf),
    #[error("could not write data to the output file at {1:?}")]
    WriteFile(#[source] std::io::Error, PathBuf),
    #[error("could not write data to the terminal")]
    WriteStdout(#[source] std::io::Error),
    #[error("could not serialize a record to JSON")]
    SerializeJson(#[source] serde_json::Error),
    #[error("could not encode a CSV row")]
    EncodeCsv,
    #[error("CSV headers must precede all records")]
    LateCsvHeaders,
}

impl Args {
    pub fn new(format: Format, output: Option<PathBuf>) -> Self {
        Self { output, format }
    }

    pub fn format(&self) -> Format {
        self.format
    }

    pub fn to_output(self) -> Result<Output, Error> {
        let io = match &self.output {
            None => Box::new(std::io::stdout().lock()) as Box<_>,
            Some(path) => Box::new(
                std::fs::OpenOptions::new()
                    .write(true)
                    .create(true)
                    .truncate(true)
                    .open(path)
                    .map_err(|e| Error::OpenOutputFile(e, path.clone()))?,
            ) as Box<_>,
        };
        Ok(Self::with_writer(self, io))
    }

    /// Output into an arbitrary writer. Errors are reported as if writing to `output`.
    pub fn with_writer(self, io: Box<dyn std::io::Write>) -> Output {
        let formatter = match &self.format {
            Format::Table => Formatter::Table { comfy: new_table(), headers: None, rows: 0 },
            Format::Jsonl => Formatter::Jsonl,
            Format::Csv => Formatter::Csv { written_records: false },
        };
        Output { args: self, io, formatter }
    }
}

fn new_table() -> comfy_table::Table {
    let mut comfy = comfy_table::Table::new();
    comfy.set_content_arrangement(comfy_table::ContentArrangement::Dynamic);
    comfy
}

pub struct Output {
    args: Args,
    io: Box<dyn std::io::Write>,
    formatter: Formatter,
}

enum Formatter {
    Csv { written_records: bool },
    Table { comfy: comfy_table::Table, headers: Option<Vec<&'static str>>, rows: usize },
    Jsonl,
}

impl Output {
    pub fn table_headers(&mut self, hdrs: Vec<&'static str>) -> Result<(), Error> {
        match &mut self.formatter {
            Formatter::Csv { written_records } => {
                if *written_records {
                    return Err(Error::LateCsvHeaders);
                }
                *written_records = true;
                self.write_csv_row(&hdrs)?;
            }
            Formatter::Table { comfy, headers, .. } => {
                comfy.set_header(hdrs.clone());
                *headers = Some(hdrs);
            }
            Formatter::Jsonl => {}
        }
        Ok(())
    }

    fn write_csv_row<V: std::ops::Deref<Target = str>>(
        &mut self,
        values: &[V],
    ) -> Result<(), Error> {
        let max_len = 2 + 2 * values.iter().map(|v| v.len()).max().unwrap_or(0);
        let mut output = vec![0; max_len];
        let mut writer = csv_core::Writer::new();
        for (index, value) in values.iter().enumerate() {
            if index > 0 {
                let (WriteResult::InputEmpty, ob) = writer.delimiter(&mut output) else {
                    return Err(Error::EncodeCsv);
                };
                self.io.write_all(&output[..ob]).map_err(|e| self.write_error(e))?;
            }
            let (WriteResult::InputEmpty, ib, ob) = writer.field(value.as_bytes(), &mut output)
            else {
                return Err(Error::EncodeCsv);
            };
            if ib != value.len() {
                return Err(Error::EncodeCsv);
            }
            self.io.write_all(&output[..ob]).map_err(|e| self.write_error(e))?;
        }
        let (WriteResult::InputEmpty, ob) = writer.terminator(&mut output) else {
            return Err(Error::EncodeCsv);
        };
        self.io.write_all(&output[..ob]).map_err(|e| self.write_error(e))
    }

    pub fn record<R: serde::Serialize>(
        &mut self,
        table_row: impl FnOnce() -> Vec<String>,
        serde_record: impl FnOnce() -> R,
    ) -> Result<(), Error> {
        match &mut self.formatter {
            Formatter::Csv { written_records } => {
                *written_records = true;
                let values = table_row();
                self.write_csv_row(&values)?;
            }
            Formatter::Table { comfy, rows, .. } => {
                comfy.add_row(table_row());
                *rows += 1;
            }
            Formatter::Jsonl => {
                serde_json::to_writer(&mut self.io, &serde_record())
                    .map_err(Error::SerializeJson)?;
                writeln!(self.io).map_err(|e| self.write_error(e))?
            }
        }
        Ok(())
    }

    fn write_error(&self, e: std::io::Error) -> Error {
        match &self.args.output {
            None => Error::WriteStdout(e),
            Some(p) => Error::WriteFile(e, p.into()),
        }
    }

    /// Emit everything recorded so far. Tables are printed and restarted with the same headers.
    pub fn flush(&mut self) -> Result<(), Error> {
        if let Formatter::Table { comfy, headers, rows } = &mut self.formatter {
            let mut table = new_table();
            if let Some(headers) = headers {
                table.set_header(headers.clone());
            }
            let printed = std::mem::replace(comfy, table);
            if std::mem::take(rows) > 0 {
                writeln!(self.io, "{printed}").map_err(|e| self.write_error(e))?;
            }
        }
        self.io.flush().map_err(|e| self.write_error(e))
    }

    pub fn commit(mut self) -> Result<(), Error> {
        self.flush()
    }
}
