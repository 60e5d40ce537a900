//! Reading MNI tag point files and other whitespace-separated tool output

use crate::error::{AlignError, Result};
use crate::pipeline::Coordinate;

/// World coordinates of every point in an MNI tag file.
///
/// Each point line starts with x y z; trailing fields (a second volume's
/// coordinates, weights, labels) are ignored.
pub fn parse_tag_points(text: &str, origin: &str) -> Result<Vec<Coordinate>> {
    let Some(start) = text.find("Points") else {
        return Err(AlignError::tool_output(origin, "tag file has no Points section"));
    };
    let body = &text[start..];
    let body = match body.find('=') {
        Some(eq) => &body[eq + 1..],
        None => return Err(AlignError::tool_output(origin, "malformed Points section")),
    };

    let mut points = Vec::new();
    for line in body.lines() {
        let line = line.trim();
        let (line, last) = match line.find(';') {
            Some(end) => (&line[..end], true),
            None => (line, false),
        };

        let values: Vec<f64> = line
            .split_whitespace()
            .take(3)
            .map_while(|token| token.parse().ok())
            .collect();
        match values.len() {
            0 => {}
            3 => points.push(Coordinate::new(values[0], values[1], values[2])),
            _ => {
                return Err(AlignError::tool_output(
                    origin,
                    format!("tag point line is not x y z: '{}'", line),
                ))
            }
        }

        if last {
            break;
        }
    }

    Ok(points)
}

/// Three numbers on the last non-empty line, as printed by `volume_cog`.
pub fn parse_last_triple(text: &str, origin: &str) -> Result<Coordinate> {
    let line = text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .last()
        .ok_or_else(|| AlignError::tool_output(origin, "no output"))?;

    let values = line
        .split_whitespace()
        .map(str::parse::<f64>)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| AlignError::tool_output(origin, format!("'{}': {}", line, e)))?;

    match values.as_slice() {
        [x, y, z] => Ok(Coordinate::new(*x, *y, *z)),
        _ => Err(AlignError::tool_output(
            origin,
            format!("expected 3 values, got '{}'", line),
        )),
    }
}

/// A single number, as printed by `mincstats -quiet`. `nan` parses to NaN.
pub fn parse_scalar(text: &str, origin: &str) -> Result<f64> {
    let token = text
        .split_whitespace()
        .next()
        .ok_or_else(|| AlignError::tool_output(origin, "no output"))?;
    token
        .parse::<f64>()
        .map_err(|e| AlignError::tool_output(origin, format!("'{}': {}", token, e)))
}
