use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::Local;
use serde::Serialize;

use crate::errors::FgtoolsError;

/// Plain-element number-density columns, in output order. The table spells
/// magnesium without the underscore.
const ELEMENTS: &[(&str, &str)] = &[
    ("H", "n_H"),
    ("Ne", "n_Ne"),
    ("Na", "n_Na"),
    ("Mg", "nMg"),
    ("Al", "n_Al"),
    ("Si", "n_Si"),
    ("P", "n_P"),
    ("S", "n_S"),
    ("Cl", "n_Cl"),
    ("Ar", "n_Ar"),
    ("K", "n_K"),
    ("Ca", "n_Ca"),
    ("Sc", "n_Sc"),
    ("Ti", "n_Ti"),
    ("V", "n_V"),
    ("Co", "n_Co"),
    ("Ni", "n_Ni"),
    ("Cr", "n_Cr"),
    ("Mn", "n_Mn"),
    ("Fe", "n_Fe"),
];

/// Isotope-resolved columns, in output order. Oxygen is lowercase in the
/// table.
const ISOTOPES: &[(&str, &[(u32, &str)])] = &[
    ("He", &[(3, "n_He3"), (4, "n_He4")]),
    ("C", &[(12, "n_C12"), (13, "n_C13")]),
    ("N", &[(14, "n_N14"), (15, "n_N15")]),
    ("O", &[(16, "n_o16"), (17, "n_o17"), (18, "n_o18")]),
];

const HEADER_LINES: usize = 3;

#[derive(Debug, Serialize)]
pub struct SolarModel {
    pub name: String,
    pub date: String,
    pub convert_datetime: String,
    pub layers: Vec<Layer>,
}

#[derive(Debug, Serialize)]
pub struct Layer {
    pub thickness: f64,
    pub temperature: f64,
    pub pressure: f64,
    pub components: Vec<Component>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum Component {
    Element {
        element: String,
        number_density: f64,
    },
    IsotopeGroup {
        element: String,
        isotopes: Vec<Isotope>,
    },
}

#[derive(Debug, Serialize)]
pub struct Isotope {
    #[serde(rename = "A")]
    pub a: u32,
    pub number_density: f64,
}

/// A whitespace-delimited numeric table whose column names are spread over
/// the first three lines, each name optionally carrying a parenthesized
/// unit that is discarded.
#[derive(Debug)]
pub struct SolarTable {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<f64>>,
}

impl SolarTable {
    pub fn parse(text: &str) -> Result<SolarTable, FgtoolsError> {
        let mut lines = text.lines().enumerate();

        let mut columns = Vec::new();
        for _ in 0..HEADER_LINES {
            let Some((_, line)) = lines.next() else {
                return Err(FgtoolsError::ModelParse {
                    line: HEADER_LINES,
                    detail: "table ends inside the three header lines".into(),
                });
            };
            columns.extend(line.split_whitespace().map(strip_unit));
        }

        if columns.is_empty() {
            return Err(FgtoolsError::ModelParse {
                line: 1,
                detail: "no column names in the header".into(),
            });
        }

        let mut rows = Vec::new();
        for (idx, line) in lines {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let mut values = Vec::with_capacity(columns.len());
            for token in line.split_whitespace() {
                let value = token.parse::<f64>().map_err(|_| FgtoolsError::ModelParse {
                    line: idx + 1,
                    detail: format!("not a number: {:?}", token),
                })?;
                values.push(value);
            }

            // A short or long row would silently shift every column after
            // the mismatch, so it is rejected outright.
            if values.len() != columns.len() {
                return Err(FgtoolsError::ModelParse {
                    line: idx + 1,
                    detail: format!(
                        "row has {} values for {} columns",
                        values.len(),
                        columns.len()
                    ),
                });
            }
            rows.push(values);
        }

        Ok(SolarTable { columns, rows })
    }

    fn column(&self, name: &str) -> Result<usize, FgtoolsError> {
        self.columns
            .iter()
            .position(|c| c == name)
            .ok_or_else(|| FgtoolsError::MissingColumn {
                column: name.to_string(),
            })
    }
}

/// `name(unit)` -> `name`; tokens without a unit pass through.
fn strip_unit(token: &str) -> String {
    match token.find('(') {
        Some(i) => token[..i].to_string(),
        None => token.to_string(),
    }
}

pub fn build_model(table: &SolarTable) -> Result<SolarModel, FgtoolsError> {
    let radius = table.column("radius")?;
    let temp = table.column("Temp")?;
    let pres = table.column("pres")?;

    // Resolve every component column up front so a missing one fails
    // before any layer is built.
    let mut element_cols = Vec::with_capacity(ELEMENTS.len());
    for (element, column) in ELEMENTS {
        element_cols.push((*element, table.column(column)?));
    }
    let mut isotope_cols = Vec::with_capacity(ISOTOPES.len());
    for (element, isos) in ISOTOPES {
        let mut cols = Vec::with_capacity(isos.len());
        for (a, column) in *isos {
            cols.push((*a, table.column(column)?));
        }
        isotope_cols.push((*element, cols));
    }

    let mut layers = Vec::with_capacity(table.rows.len());
    let mut last_radius = 0.0;
    for row in &table.rows {
        let r = row[radius];

        let mut components = Vec::with_capacity(element_cols.len() + isotope_cols.len());
        for (element, col) in &element_cols {
            components.push(Component::Element {
                element: (*element).to_string(),
                number_density: row[*col],
            });
        }
        for (element, cols) in &isotope_cols {
            components.push(Component::IsotopeGroup {
                element: (*element).to_string(),
                isotopes: cols
                    .iter()
                    .map(|&(a, col)| Isotope {
                        a,
                        number_density: row[col],
                    })
                    .collect(),
            });
        }

        layers.push(Layer {
            thickness: r - last_radius,
            temperature: row[temp],
            // dyne/cm2 -> Pa
            pressure: 0.1 * row[pres],
            components,
        });
        last_radius = r;
    }

    Ok(SolarModel {
        name: "The Sun".into(),
        date: "Feb 24".into(),
        convert_datetime: Local::now().format("%Y-%m-%d %H:%M:%S%.6f").to_string(),
        layers,
    })
}

/// Read a composition table and write the YAML model.
pub fn convert(input: &Path, output: &Path) -> Result<()> {
    let text = fs::read_to_string(input).map_err(|source| FgtoolsError::ModelRead {
        path: input.to_path_buf(),
        source,
    })?;
    let table = SolarTable::parse(&text)?;
    let model = build_model(&table)?;

    let yaml = serde_yaml::to_string(&model)?;
    fs::write(output, format!("# Solar atmosphere\n{}", yaml))
        .with_context(|| format!("writing {}", output.display()))?;
    Ok(())
}
