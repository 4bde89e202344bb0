use crate::model::RingSnapshot;
use std::collections::BTreeMap;
use std::f64::consts::{FRAC_PI_2, TAU};

/// Where the ring is drawn. Screen convention: `y` grows downward, so
/// increasing angles run clockwise.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RingGeometry {
    pub center_x: f64,
    pub center_y: f64,
    pub radius: f64,
}

impl Default for RingGeometry {
    fn default() -> Self {
        Self {
            center_x: 0.0,
            center_y: 0.0,
            radius: 1.0,
        }
    }
}

impl RingGeometry {
    pub fn place(&self, angle: f64) -> (f64, f64) {
        (
            self.center_x + self.radius * angle.cos(),
            self.center_y + self.radius * angle.sin(),
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NodePosition {
    pub angle: f64,
    pub x: f64,
    pub y: f64,
}

/// Angle of a ring position; position 0 sits at the top (`-pi/2`).
pub fn ring_angle(ring_position: u64, ring_size: u64) -> f64 {
    (ring_position as f64 / ring_size as f64) * TAU - FRAC_PI_2
}

pub fn positions(snapshot: &RingSnapshot, geometry: &RingGeometry) -> BTreeMap<String, NodePosition> {
    snapshot
        .nodes()
        .iter()
        .map(|node| {
            let angle = ring_angle(node.ring_position(), snapshot.ring_size());
            let (x, y) = geometry.place(angle);
            (node.node_id().to_string(), NodePosition { angle, x, y })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::PollResponse;
    use serde_json::json;

    const EPS: f64 = 1e-9;

    #[test]
    fn quarter_positions_map_to_compass_points() {
        assert!((ring_angle(0, 100) + FRAC_PI_2).abs() < EPS);
        assert!(ring_angle(25, 100).abs() < EPS);
        assert!((ring_angle(50, 100) - FRAC_PI_2).abs() < EPS);
    }

    #[test]
    fn positions_use_supplied_geometry() {
        let payload: PollResponse = serde_json::from_value(json!({
            "size": 100,
            "nodes": [
                {"nodeID": "top", "key": 0},
                {"nodeID": "right", "key": 25}
            ]
        }))
        .expect("poll payload");
        let snapshot = RingSnapshot::from_poll_response(&payload).expect("valid snapshot");
        let geometry = RingGeometry {
            center_x: 400.0,
            center_y: 300.0,
            radius: 300.0,
        };

        let table = positions(&snapshot, &geometry);

        let top = table["top"];
        assert!((top.x - 400.0).abs() < EPS);
        assert!(top.y.abs() < EPS);
        let right = table["right"];
        assert!((right.x - 700.0).abs() < EPS);
        assert!((right.y - 300.0).abs() < EPS);
    }
}
