//! `tool`
//!
//! Tool selection and the per-job cutting parameters.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

/// The tools mounted on the cutter, as the operator knows them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ToolId {
    /// The first cutting tool.
    #[default]
    Tool1,
    /// The second cutting tool.
    Tool2,
    /// The drawing pen.
    Pen,
}

impl ToolId {
    /// Every tool, in the order the operator is offered them.
    pub const ALL: [ToolId; 3] = [ToolId::Tool1, ToolId::Tool2, ToolId::Pen];

    /// The carousel slot sent in the `SP` (select pen) directive.
    ///
    /// The carousel has a gap, the machine's slot numbers do not follow the
    /// order tools are listed in.
    ///
    /// # Returns
    /// The slot number the device expects for this tool.
    #[must_use]
    pub const fn device_slot(self) -> u8 {
        match self {
            ToolId::Tool1 => 2,
            ToolId::Tool2 => 4,
            ToolId::Pen => 3,
        }
    }
}

impl fmt::Display for ToolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ToolId::Tool1 => "Tool1",
            ToolId::Tool2 => "Tool2",
            ToolId::Pen => "Pen",
        };
        f.write_str(name)
    }
}

impl FromStr for ToolId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ToolId::ALL
            .into_iter()
            .find(|tool| tool.to_string().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown tool {s:?}, expected one of Tool1, Tool2, Pen"))
    }
}

/// The settings for a single cutting job.
///
/// The encoder only formats these values. Keeping them in range is the job of
/// whoever builds them, see [`ParameterLimits::parameters`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct JobParameters {
    /// The tool to cut with.
    pub tool: ToolId,
    /// How far the tool is lowered into the material, in mm.
    pub depth_mm: f64,
    /// How fast the tool moves while cutting, in mm/s.
    pub speed_mm_per_sec: u32,
}

/// A closed range with a default value, used for operator-supplied numbers.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Limit<T> {
    /// Smallest accepted value.
    pub min: T,
    /// Largest accepted value.
    pub max: T,
    /// Value used when the operator gives none.
    pub default: T,
}

impl<T: PartialOrd + Copy> Limit<T> {
    /// Clamps a value to this range.
    ///
    /// # Arguments
    /// * `value`: The requested value, or `None` for the default.
    ///
    /// # Returns
    /// The value to use, clamped to `min..=max`.
    #[must_use]
    pub fn resolve(&self, value: Option<T>) -> T {
        let value = value.unwrap_or(self.default);
        if value < self.min {
            self.min
        } else if value > self.max {
            self.max
        } else {
            value
        }
    }
}

/// The ranges accepted for depth and speed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParameterLimits {
    /// Cutting depth, in mm.
    pub depth_mm: Limit<f64>,
    /// Cutting speed, in mm/s.
    pub speed_mm_per_sec: Limit<u32>,
}

impl Default for ParameterLimits {
    fn default() -> Self {
        ParameterLimits {
            depth_mm: Limit {
                min: 0.01,
                max: 40.0,
                default: 1.0,
            },
            speed_mm_per_sec: Limit {
                min: 1,
                max: 30,
                default: 30,
            },
        }
    }
}

impl ParameterLimits {
    /// Builds [`JobParameters`] from operator input, clamping anything out of range.
    ///
    /// # Arguments
    /// * `tool`: The tool to use.
    /// * `depth_mm`: Requested depth, or `None` for the default.
    /// * `speed_mm_per_sec`: Requested speed, or `None` for the default.
    ///
    /// # Returns
    /// Parameters that are safe to send to the machine.
    #[must_use]
    #[allow(clippy::float_cmp)]
    pub fn parameters(
        &self,
        tool: ToolId,
        depth_mm: Option<f64>,
        speed_mm_per_sec: Option<u32>,
    ) -> JobParameters {
        let depth = match depth_mm {
            Some(requested) if requested.is_nan() => {
                log::warn!("Depth is not a number, using {}mm", self.depth_mm.default);
                self.depth_mm.default
            }
            requested => {
                let depth = self.depth_mm.resolve(requested);
                if let Some(requested) = requested.filter(|requested| *requested != depth) {
                    log::warn!("Depth {requested}mm is out of range, using {depth}mm");
                }
                depth
            }
        };

        let speed = self.speed_mm_per_sec.resolve(speed_mm_per_sec);
        if let Some(requested) = speed_mm_per_sec.filter(|requested| *requested != speed) {
            log::warn!("Speed {requested}mm/s is out of range, using {speed}mm/s");
        }

        JobParameters {
            tool,
            depth_mm: depth,
            speed_mm_per_sec: speed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_slot() {
        assert_eq!(ToolId::Tool1.device_slot(), 2);
        assert_eq!(ToolId::Tool2.device_slot(), 4);
        assert_eq!(ToolId::Pen.device_slot(), 3);

        // no hidden state: asking again gives the same answers
        for _ in 0..3 {
            let slots: Vec<u8> = ToolId::ALL.iter().map(|tool| tool.device_slot()).collect();
            assert_eq!(slots, vec![2, 4, 3]);
        }
    }

    #[test]
    fn test_tool_from_str() {
        assert_eq!("tool1".parse::<ToolId>(), Ok(ToolId::Tool1));
        assert_eq!("TOOL2".parse::<ToolId>(), Ok(ToolId::Tool2));
        assert_eq!("Pen".parse::<ToolId>(), Ok(ToolId::Pen));
        assert!("knife".parse::<ToolId>().is_err());
    }

    #[test]
    fn test_parameters_defaults() {
        let limits = ParameterLimits::default();

        assert_eq!(
            limits.parameters(ToolId::Pen, None, None),
            JobParameters {
                tool: ToolId::Pen,
                depth_mm: 1.0,
                speed_mm_per_sec: 30,
            }
        );
    }

    #[test]
    fn test_parameters_clamped() {
        let limits = ParameterLimits::default();

        let params = limits.parameters(ToolId::Tool2, Some(55.0), Some(0));
        assert_eq!(params.depth_mm, 40.0, "depth clamped to max");
        assert_eq!(params.speed_mm_per_sec, 1, "speed clamped to min");

        let params = limits.parameters(ToolId::Tool2, Some(0.0), Some(1000));
        assert_eq!(params.depth_mm, 0.01, "depth clamped to min");
        assert_eq!(params.speed_mm_per_sec, 30, "speed clamped to max");

        let params = limits.parameters(ToolId::Tool2, Some(2.5), Some(12));
        assert_eq!(params.depth_mm, 2.5, "should not clamp");
        assert_eq!(params.speed_mm_per_sec, 12, "should not clamp");
    }

    #[test]
    fn test_parameters_nan_depth() {
        let params = ParameterLimits::default().parameters(ToolId::Tool1, Some(f64::NAN), None);
        assert_eq!(params.depth_mm, 1.0);
    }

    #[test]
    fn test_tool_deserialises_from_name() {
        let tool: ToolId = serde_json::from_str("\"Pen\"").expect("failed to parse tool");
        assert_eq!(tool, ToolId::Pen);
        assert_eq!(tool.to_string(), "Pen");
    }
}
