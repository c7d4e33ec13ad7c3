//! Reader for the `.rxt` instrument description format.
//!
//! An `.rxt` file is plain text: the magic token `IAD1`, a fixed sequence of
//! labeled floats, then a table of measurement rows. `#` starts a comment,
//! blank lines are skipped, and commas count as whitespace. The header
//! order is
//!
//! ```text
//! n_sample  n_slide  d_sample  d_slide        (geometry, mm)
//! d_beam  r_std  theta_incident               (illumination, degrees)
//! quad_pts  tolerance                         (analysis)
//! num_spheres                                 (0, 1 or 2)
//! d_sphere d_sample d_third d_detector r_detector r_wall   (×2 when present)
//! num_measures                                (columns per row, 1-3)
//! wavelength  M_R  [M_T  [M_U]]               (one row per wavelength)
//! ```

use std::path::Path;

use turbid::sphere::{PortId, Sphere};
use turbid::{Experiment, Measurement, Sample};

use crate::error::CliError;

/// Everything read from one instrument file.
#[derive(Debug, Clone)]
pub struct InstrumentFile {
    /// Experiment template shared by all rows.
    pub experiment: Experiment,
    /// Wavelengths, one per measurement row.
    pub wavelengths: Vec<f64>,
    /// Measurement rows in file order.
    pub rows: Vec<Measurement>,
}

/// Strips comments and collects whitespace/comma separated tokens.
fn tokenize(text: &str) -> Vec<(usize, &str)> {
    let mut tokens = Vec::new();
    for (line_no, line) in text.lines().enumerate() {
        let content = line.split('#').next().unwrap_or("");
        for token in content.split(|c: char| c.is_whitespace() || c == ',') {
            if !token.is_empty() {
                tokens.push((line_no + 1, token));
            }
        }
    }
    tokens
}

struct Cursor<'a> {
    tokens: Vec<(usize, &'a str)>,
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn next_f64(&mut self, what: &str) -> Result<f64, CliError> {
        let (line, token) = self.tokens.get(self.pos).copied().ok_or(CliError::Parse {
            line: self.tokens.last().map_or(0, |t| t.0),
            message: format!("missing value for {what}"),
        })?;
        self.pos += 1;
        token.parse::<f64>().map_err(|_| CliError::Parse {
            line,
            message: format!("expected a number for {what}, found `{token}`"),
        })
    }

    fn remaining(&self) -> usize {
        self.tokens.len() - self.pos
    }
}

fn read_sphere(cursor: &mut Cursor) -> Result<Sphere, CliError> {
    let d_sphere = cursor.next_f64("sphere diameter")?;
    let d_sample = cursor.next_f64("sample port diameter")?;
    let d_third = cursor.next_f64("third port diameter")?;
    let d_detector = cursor.next_f64("detector port diameter")?;
    let r_detector = cursor.next_f64("detector reflectance")?;
    let r_wall = cursor.next_f64("wall reflectance")?;
    let mut sphere = Sphere::new(d_sphere, d_sample);
    sphere.set_port_diameter(PortId::Third, d_third);
    sphere.set_port_diameter(PortId::Detector, d_detector);
    sphere.set_port_uru(PortId::Detector, r_detector);
    sphere.r_wall = r_wall;
    Ok(sphere)
}

/// Parses `.rxt` text into an [`InstrumentFile`].
pub fn parse(text: &str) -> Result<InstrumentFile, CliError> {
    let mut tokens = tokenize(text);
    if tokens.first().map(|t| t.1) != Some("IAD1") {
        return Err(CliError::Parse {
            line: 1,
            message: "not an .rxt file (missing IAD1 magic)".into(),
        });
    }
    tokens.remove(0);
    let mut cursor = Cursor { tokens, pos: 0 };

    let mut sample = Sample {
        n: cursor.next_f64("sample index")?,
        n_above: cursor.next_f64("slide index")?,
        d: cursor.next_f64("sample thickness")?,
        ..Sample::default()
    };
    let d_slide = cursor.next_f64("slide thickness")?;
    if d_slide == 0.0 || sample.n_above == 0.0 {
        sample.n_above = 1.0;
    }
    sample.n_below = sample.n_above;

    let _d_beam = cursor.next_f64("beam diameter")?;
    let r_std = cursor.next_f64("standard reflectance")?;
    let theta = cursor.next_f64("incident angle")?;
    sample.nu_0 = theta.to_radians().cos();
    sample.quad_pts = cursor.next_f64("quadrature points")? as usize;
    let tolerance = cursor.next_f64("tolerance")?;

    let num_spheres = cursor.next_f64("number of spheres")? as usize;
    let (r_sphere, t_sphere) = if num_spheres > 0 {
        let mut r = read_sphere(&mut cursor)?;
        let mut t = read_sphere(&mut cursor)?;
        r.r_std = r_std;
        t.r_std = r_std;
        (Some(r), Some(t))
    } else {
        (None, None)
    };

    let num_measures = cursor.next_f64("number of measurements")? as usize;
    if !(1..=3).contains(&num_measures) {
        return Err(CliError::Parse {
            line: 0,
            message: format!("number of measurements must be 1-3, got {num_measures}"),
        });
    }

    let columns = num_measures + 1;
    if cursor.remaining() % columns != 0 {
        return Err(CliError::Parse {
            line: 0,
            message: format!(
                "data block has {} values, not a multiple of {columns} columns",
                cursor.remaining()
            ),
        });
    }

    let mut wavelengths = Vec::new();
    let mut rows = Vec::new();
    while cursor.remaining() > 0 {
        wavelengths.push(cursor.next_f64("wavelength")?);
        let m_r = cursor.next_f64("M_R")?;
        let m_t = if num_measures >= 2 {
            Some(cursor.next_f64("M_T")?)
        } else {
            None
        };
        let m_u = if num_measures >= 3 {
            Some(cursor.next_f64("M_U")?)
        } else {
            None
        };
        rows.push(Measurement {
            m_r: Some(m_r),
            m_t,
            m_u,
        });
    }

    let mut experiment = Experiment {
        sample,
        r_sphere,
        t_sphere,
        num_spheres,
        ..Experiment::default()
    };
    experiment.options.tolerance = tolerance;

    Ok(InstrumentFile {
        experiment,
        wavelengths,
        rows,
    })
}

/// Reads and parses an `.rxt` file from disk.
pub fn read(path: &Path) -> Result<InstrumentFile, CliError> {
    let text = std::fs::read_to_string(path)?;
    parse(&text)
}
