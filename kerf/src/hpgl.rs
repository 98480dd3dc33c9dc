//! `hpgl`
//!
//! Encodes a job as the HPGL dialect spoken by Zünd cutters.

use std::fmt;

use ascii::AsciiString;

use crate::{geometry::Polyline, tool::JobParameters};

/// Plotter units per mm, the device works in hundredths of a millimetre.
pub const PLOTTER_UNITS_PER_MM: f64 = 100.0;

/// Device type sent in the `DT` directive.
const DEVICE_TYPE: u32 = 59;
/// First argument of the `ZP` directive, fixed by the device.
const Z_REFERENCE: u32 = 1000;
/// Pen-up travel velocity, the second argument of `VS`.
const TRAVEL_VELOCITY: u32 = 40;
/// Where the head is parked once the job is done, in plotter units.
const PARK_POSITION: PlotterPoint = PlotterPoint { x: 160_000, y: 0 };

/// Job label shown on the device when none is configured.
pub const DEFAULT_JOB_LABEL: &str = "ZuendTest";

/// A point in plotter units.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlotterPoint {
    /// Horizontal axis position.
    pub x: i64,
    /// Vertical axis position.
    pub y: i64,
}

/// A single semicolon-terminated HPGL directive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive {
    /// `PS`, power the plotter on (1) or off (0).
    PlotterSelect(u8, u8),
    /// `PB`, buffer mode.
    BufferMode(u8, u8),
    /// `DT`, device type.
    DeviceType(u32),
    /// `UR`, the label shown on the device for this job.
    JobLabel(AsciiString),
    /// `SP`, select a carousel slot.
    SelectPen(u8),
    /// `TR`, transform mode.
    Transform(u8),
    /// `PU`, raise the tool, optionally travelling to a point.
    PenUp(Option<PlotterPoint>),
    /// `PD`, lower the tool and cut to a point.
    PenDown(PlotterPoint),
    /// `PA`, switch to absolute positioning, optionally moving to a point.
    PlotAbsolute(Option<PlotterPoint>),
    /// `ZP`, Z axis position.
    ZAxis {
        /// Fixed reference value.
        reference: u32,
        /// Cutting depth in plotter units.
        depth: i64,
    },
    /// `VS`, velocity settings.
    VelocitySettings {
        /// Velocity while cutting, in mm/s.
        cutting: u32,
        /// Velocity while travelling with the tool raised.
        travel: u32,
    },
    /// `BP`, cut the border and finish.
    BorderPass,
    /// `NR`, reset.
    Reset,
}

impl fmt::Display for Directive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Directive::PlotterSelect(a, b) => write!(f, "PS {a},{b};"),
            Directive::BufferMode(a, b) => write!(f, "PB {a},{b};"),
            Directive::DeviceType(id) => write!(f, "DT {id};"),
            Directive::JobLabel(label) => write!(f, "UR {label};"),
            Directive::SelectPen(slot) => write!(f, "SP {slot};"),
            Directive::Transform(mode) => write!(f, "TR {mode};"),
            Directive::PenUp(None) => write!(f, "PU;"),
            Directive::PenUp(Some(PlotterPoint { x, y })) => write!(f, "PU {x}, {y};"),
            Directive::PenDown(PlotterPoint { x, y }) => write!(f, "PD {x}, {y};"),
            Directive::PlotAbsolute(None) => write!(f, "PA;"),
            Directive::PlotAbsolute(Some(PlotterPoint { x, y })) => write!(f, "PA {x},{y};"),
            Directive::ZAxis { reference, depth } => write!(f, "ZP {reference}, {depth};"),
            Directive::VelocitySettings { cutting, travel } => write!(f, "VS {cutting}, {travel};"),
            Directive::BorderPass => write!(f, "BP;"),
            Directive::Reset => write!(f, "NR;"),
        }
    }
}

/// One line of the stream.
///
/// The directives are written back to back, except that a pen select opening a line is
/// followed by a space when more directives come after it, as in existing Zünd plot files.
pub type Line = Vec<Directive>;

/// The complete set of directives for a job, ready to be sent.
///
/// Written out as ASCII with lines separated by `\n` and no trailing newline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandStream {
    /// The lines of the stream, in order.
    lines: Vec<Line>,
}

impl CommandStream {
    /// Gets the lines of the stream.
    ///
    /// # Returns
    /// Every line, in the order it will be sent.
    #[must_use]
    pub fn lines(&self) -> &[Line] {
        &self.lines
    }

    /// Iterates over every directive in the stream, in order.
    pub fn directives(&self) -> impl Iterator<Item = &Directive> {
        self.lines.iter().flatten()
    }

    /// Gets the bytes to put on the wire.
    ///
    /// # Returns
    /// The stream as ASCII bytes.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        self.to_string().into_bytes()
    }
}

impl fmt::Display for CommandStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, line) in self.lines.iter().enumerate() {
            if index > 0 {
                f.write_str("\n")?;
            }
            for (position, directive) in line.iter().enumerate() {
                write!(f, "{directive}")?;
                if position == 0 && line.len() > 1 && matches!(directive, Directive::SelectPen(_)) {
                    f.write_str(" ")?;
                }
            }
        }
        Ok(())
    }
}

/// Converts a coordinate in mm to plotter units.
///
/// Truncates toward zero, never rounds.
///
/// # Arguments
/// * `mm`: The value in mm.
///
/// # Returns
/// The value in plotter units.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn mm_to_plotter_units(mm: f64) -> i64 {
    (mm * PLOTTER_UNITS_PER_MM).trunc() as i64
}

/// Converts a cutting depth in mm to the value sent in `ZP`.
///
/// # Arguments
/// * `depth_mm`: The depth in mm.
///
/// # Returns
/// The depth in plotter units, rounded to the nearest unit.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn depth_to_plotter_units(depth_mm: f64) -> i64 {
    (depth_mm * PLOTTER_UNITS_PER_MM).round() as i64
}

/// Turns polylines and job parameters into a [`CommandStream`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobEncoder {
    /// Label shown on the device while the job runs.
    label: AsciiString,
}

impl Default for JobEncoder {
    fn default() -> Self {
        JobEncoder {
            label: AsciiString::from_ascii(DEFAULT_JOB_LABEL).unwrap_or_default(),
        }
    }
}

impl JobEncoder {
    /// Creates a new [`JobEncoder`].
    ///
    /// # Arguments
    /// * `label`: Shown on the device's display, should be recognisable to the operator.
    ///   It is written as is, so it must not contain `;` or control characters, see
    ///   [`crate::Config::validate`].
    #[must_use]
    pub fn new(label: AsciiString) -> Self {
        JobEncoder { label }
    }

    /// Gets the job label.
    ///
    /// # Returns
    /// The label sent in the `UR` directive.
    #[must_use]
    pub fn label(&self) -> &AsciiString {
        &self.label
    }

    /// Generates the HPGL for a job.
    ///
    /// # Arguments
    /// * `polylines`: The paths to cut, in order.
    /// * `params`: Tool, depth and speed for the job.
    ///
    /// # Returns
    /// The complete command stream.
    #[must_use]
    pub fn encode(&self, polylines: &[Polyline], params: &JobParameters) -> CommandStream {
        let mut lines = self.header(params);
        for polyline in polylines {
            lines.extend(trace_polyline(polyline));
        }
        lines.extend(footer());

        CommandStream { lines }
    }

    /// Generates the header, which selects the tool and sets depth and speed.
    ///
    /// # Arguments
    /// * `params`: Tool, depth and speed for the job.
    ///
    /// # Returns
    /// The header lines.
    fn header(&self, params: &JobParameters) -> Vec<Line> {
        let slot = params.tool.device_slot();

        // The device expects the pen to be selected three times, keep all of them.
        vec![
            vec![Directive::PlotterSelect(1, 1), Directive::BufferMode(2, 1)],
            vec![Directive::DeviceType(DEVICE_TYPE)],
            vec![Directive::JobLabel(self.label.clone())],
            vec![
                Directive::SelectPen(slot),
                Directive::Transform(1),
                Directive::PenUp(None),
                Directive::PlotAbsolute(None),
            ],
            vec![Directive::SelectPen(slot)],
            vec![Directive::ZAxis {
                reference: Z_REFERENCE,
                depth: depth_to_plotter_units(params.depth_mm),
            }],
            vec![Directive::SelectPen(slot)],
            vec![Directive::VelocitySettings {
                cutting: params.speed_mm_per_sec,
                travel: TRAVEL_VELOCITY,
            }],
        ]
    }
}

/// Traces through all of the points in a polyline.
///
/// # Arguments
/// * `polyline`: The polyline to trace.
///
/// # Returns
/// A travel move to the first point and a cutting move to every point after it, one per line.
fn trace_polyline(polyline: &Polyline) -> impl Iterator<Item = Line> + '_ {
    polyline.iter().enumerate().map(|(index, point)| {
        let point = PlotterPoint {
            x: mm_to_plotter_units(point.x),
            y: mm_to_plotter_units(point.y),
        };
        if index == 0 {
            vec![Directive::PenUp(Some(point))]
        } else {
            vec![Directive::PenDown(point)]
        }
    })
}

/// Generates the footer, which lifts the tool, parks the head and releases the plotter.
///
/// # Returns
/// The footer lines, identical for every job.
fn footer() -> Vec<Line> {
    vec![
        vec![Directive::PenUp(None)],
        vec![Directive::PenUp(None)],
        vec![
            Directive::PenUp(None),
            Directive::PlotAbsolute(Some(PARK_POSITION)),
            Directive::BorderPass,
            Directive::PlotterSelect(1, 0),
            Directive::BufferMode(2, 0),
            Directive::Reset,
        ],
    ]
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::{geometry::Point2D, tool::ToolId};

    const FOOTER: &str = "PU;\nPU;\nPU;PA 160000,0;BP;PS 1,0;PB 2,0;NR;";

    fn params(tool: ToolId, depth_mm: f64, speed_mm_per_sec: u32) -> JobParameters {
        JobParameters {
            tool,
            depth_mm,
            speed_mm_per_sec,
        }
    }

    fn polyline(points: &[(f64, f64)]) -> Polyline {
        points.iter().copied().map(Point2D::from).collect()
    }

    #[test]
    fn test_mm_to_plotter_units() {
        assert_eq!(mm_to_plotter_units(10.0), 1000, "10mm");
        assert_eq!(mm_to_plotter_units(12.346), 1234, "truncated, not rounded");
        assert_eq!(mm_to_plotter_units(0.009), 0, "below resolution");
        assert_eq!(mm_to_plotter_units(-0.5), -50, "negative");
        assert_eq!(mm_to_plotter_units(-12.346), -1234, "truncated toward zero");
        assert_eq!(mm_to_plotter_units(f64::NAN), 0, "NaN");
    }

    #[test]
    fn test_depth_to_plotter_units() {
        assert_eq!(depth_to_plotter_units(1.0), 100);
        assert_eq!(depth_to_plotter_units(0.01), 1);
        assert_eq!(depth_to_plotter_units(40.0), 4000);
        assert_eq!(depth_to_plotter_units(0.29), 29, "rounded");
        assert_eq!(depth_to_plotter_units(1000.0), 100_000, "out of range still formats");
    }

    #[test]
    fn test_directive_text() {
        let point = PlotterPoint { x: 1000, y: -5 };

        assert_eq!(Directive::PenUp(Some(point)).to_string(), "PU 1000, -5;");
        assert_eq!(Directive::PenDown(point).to_string(), "PD 1000, -5;");
        assert_eq!(Directive::PenUp(None).to_string(), "PU;");
        assert_eq!(Directive::PlotAbsolute(Some(point)).to_string(), "PA 1000,-5;");
        assert_eq!(
            Directive::ZAxis {
                reference: 1000,
                depth: 250
            }
            .to_string(),
            "ZP 1000, 250;"
        );
        assert_eq!(
            Directive::VelocitySettings {
                cutting: 12,
                travel: 40
            }
            .to_string(),
            "VS 12, 40;"
        );
    }

    #[test]
    fn test_encode_square_job() {
        let stream = JobEncoder::default().encode(
            &[polyline(&[(0.0, 0.0), (10.0, 0.0), (10.0, 10.0)])],
            &params(ToolId::Tool1, 1.0, 30),
        );

        assert_eq!(
            stream.to_string(),
            "PS 1,1;PB 2,1;\n\
             DT 59;\n\
             UR ZuendTest;\n\
             SP 2; TR 1;PU;PA;\n\
             SP 2;\n\
             ZP 1000, 100;\n\
             SP 2;\n\
             VS 30, 40;\n\
             PU 0, 0;\n\
             PD 1000, 0;\n\
             PD 1000, 1000;\n\
             PU;\n\
             PU;\n\
             PU;PA 160000,0;BP;PS 1,0;PB 2,0;NR;"
        );
    }

    #[test]
    fn test_encode_pen_up_then_pen_down() {
        let stream = JobEncoder::default().encode(
            &[
                polyline(&[(1.0, 1.0), (2.0, 2.0), (3.0, 1.0)]),
                polyline(&[(5.0, 5.0)]),
            ],
            &params(ToolId::Pen, 0.5, 10),
        );

        let moves: Vec<String> = stream
            .directives()
            .filter(|directive| {
                matches!(
                    directive,
                    Directive::PenUp(Some(_)) | Directive::PenDown(_)
                )
            })
            .map(ToString::to_string)
            .collect();

        assert_eq!(
            moves,
            vec![
                "PU 100, 100;",
                "PD 200, 200;",
                "PD 300, 100;",
                "PU 500, 500;",
            ],
            "single point polyline only travels"
        );
    }

    #[test]
    fn test_encode_selects_tool_three_times() {
        for tool in ToolId::ALL {
            let stream =
                JobEncoder::default().encode(&[polyline(&[(0.0, 0.0)])], &params(tool, 1.0, 30));
            let selections: Vec<&Directive> = stream
                .directives()
                .filter(|directive| matches!(directive, Directive::SelectPen(_)))
                .collect();

            assert_eq!(
                selections,
                vec![&Directive::SelectPen(tool.device_slot()); 3],
                "{tool}"
            );
        }
    }

    #[test]
    fn test_space_after_opening_pen_select() {
        let stream =
            JobEncoder::default().encode(&[polyline(&[(0.0, 0.0)])], &params(ToolId::Pen, 1.0, 30));
        let text = stream.to_string();
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(lines[3], "SP 3; TR 1;PU;PA;");
        assert_eq!(lines[4], "SP 3;", "a pen select on its own has no space");
        assert_eq!(lines[6], "SP 3;");
    }

    #[test]
    fn test_encode_custom_label() {
        let label = AsciiString::from_ascii("Lasercut 7").expect("label is ascii");
        let encoder = JobEncoder::new(label.clone());
        let stream = encoder.encode(&[polyline(&[(0.0, 0.0)])], &params(ToolId::Tool2, 1.0, 30));

        assert_eq!(encoder.label(), &label);
        assert_eq!(stream.lines()[2], vec![Directive::JobLabel(label)]);
    }

    #[test]
    fn test_footer_is_constant() {
        let encoder = JobEncoder::default();
        let a = encoder.encode(&[polyline(&[(1.0, 2.0)])], &params(ToolId::Tool1, 1.0, 30));
        let b = encoder.encode(
            &[polyline(&[(400.0, 20.0), (1.0, 1.0)])],
            &params(ToolId::Pen, 39.0, 1),
        );

        assert!(a.to_string().ends_with(FOOTER), "footer missing from {a}");
        assert!(b.to_string().ends_with(FOOTER), "footer missing from {b}");
    }

    proptest! {
        #[test]
        fn prop_one_move_per_point(
            polylines in prop::collection::vec(
                prop::collection::vec((-1.0f64..1601.0, -1.0f64..1301.0), 1..20),
                1..10,
            ),
            depth in 0.01f64..40.0,
            speed in 1u32..=30,
        ) {
            let polylines: Vec<Polyline> = polylines.iter().map(|points| polyline(points)).collect();
            let encoder = JobEncoder::default();
            let stream = encoder.encode(&polylines, &params(ToolId::Tool1, depth, speed));

            let travels = stream
                .directives()
                .filter(|directive| matches!(directive, Directive::PenUp(Some(_))))
                .count();
            let cuts = stream
                .directives()
                .filter(|directive| matches!(directive, Directive::PenDown(_)))
                .count();
            let points: usize = polylines.iter().map(Vec::len).sum();

            prop_assert_eq!(travels, polylines.len());
            prop_assert_eq!(cuts, points - polylines.len());
            prop_assert!(stream.to_bytes().is_ascii());

            // same input, same bytes
            let again = encoder.encode(&polylines, &params(ToolId::Tool1, depth, speed));
            prop_assert_eq!(stream.to_bytes(), again.to_bytes());
        }
    }
}
