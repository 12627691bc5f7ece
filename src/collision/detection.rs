use std::sync::Arc;

use glam::DVec3;
use parking_lot::RwLock;
use rayon::prelude::*;

use crate::collision::{CollisionData, CollisionElement};
use crate::geometry::{ImplicitGeometry, PointSet};
use crate::sph::SphShared;

/// Where a detection pass reads its points from.
#[derive(Clone)]
pub enum PointSource {
    /// Particle positions of a fluid, read straight from its state.
    Sph(Arc<SphShared>),
    Points(Arc<RwLock<PointSet>>),
}

impl PointSource {
    /// A copy of the current positions. No lock is held once this returns,
    /// so callers may fan out onto the worker pool.
    pub fn positions(&self) -> Vec<DVec3> {
        match self {
            Self::Sph(shared) => shared.state().positions.clone(),
            Self::Points(points) => points.read().positions().to_vec(),
        }
    }

    /// A copy of the current velocities; empty for static point sets.
    pub fn velocities(&self) -> Vec<DVec3> {
        match self {
            Self::Sph(shared) => shared.state().velocities.clone(),
            Self::Points(_) => Vec::new(),
        }
    }
}

impl std::fmt::Debug for PointSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sph(_) => f.write_str("PointSource::Sph"),
            Self::Points(_) => f.write_str("PointSource::Points"),
        }
    }
}

/// Narrow-phase tests between an implicit surface (side A) and a point set
/// (side B).
///
/// A point collides only if its signed distance is strictly negative; the
/// contact direction is the negated, normalized gradient and the depth is
/// the absolute signed distance.
#[derive(Debug, Clone)]
pub enum CollisionDetection {
    PointSetToPlane {
        plane: Arc<RwLock<ImplicitGeometry>>,
        points: PointSource,
    },
    ImplicitToPointSet {
        geometry: Arc<RwLock<ImplicitGeometry>>,
        points: PointSource,
    },
}

impl CollisionDetection {
    /// The cheapest test for the given geometry.
    pub fn for_geometry(geometry: Arc<RwLock<ImplicitGeometry>>, points: PointSource) -> Self {
        if matches!(*geometry.read(), ImplicitGeometry::Plane { .. }) {
            Self::PointSetToPlane {
                plane: geometry,
                points,
            }
        } else {
            Self::ImplicitToPointSet { geometry, points }
        }
    }

    pub fn points(&self) -> &PointSource {
        match self {
            Self::PointSetToPlane { points, .. } | Self::ImplicitToPointSet { points, .. } => points,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::PointSetToPlane { .. } => "PointSetToPlaneCD",
            Self::ImplicitToPointSet { .. } => "ImplicitGeometryToPointSetCD",
        }
    }

    /// Clear `data` and fill it with this frame's contacts.
    pub fn compute(&self, data: &CollisionData) {
        data.clear();

        match self {
            Self::PointSetToPlane { plane, points } => {
                let geometry = plane.read();
                match &*geometry {
                    ImplicitGeometry::Plane { point, normal } => {
                        let (origin, normal) = (*point, *normal);
                        detect(points, data, |p| {
                            let distance = (p - origin).dot(normal);
                            (distance, normal)
                        });
                    }
                    other => detect_implicit(other, points, data),
                }
            }
            Self::ImplicitToPointSet { geometry, points } => {
                detect_implicit(&geometry.read(), points, data);
            }
        }
    }
}

fn detect_implicit(geometry: &ImplicitGeometry, points: &PointSource, data: &CollisionData) {
    detect(points, data, |p| {
        let distance = geometry.signed_distance(p);
        if distance < 0.0 {
            (distance, geometry.gradient(p))
        } else {
            (distance, DVec3::ZERO)
        }
    });
}

/// `probe` returns the signed distance and the (unnormalized) gradient.
fn detect<F>(points: &PointSource, data: &CollisionData, probe: F)
where
    F: Fn(DVec3) -> (f64, DVec3) + Sync,
{
    let positions = points.positions();
    positions.par_iter().enumerate().for_each(|(index, &point)| {
        let (distance, gradient) = probe(point);
        if distance < 0.0 {
            data.safe_append(CollisionElement {
                direction: -gradient.normalize_or_zero(),
                depth: distance.abs(),
                point,
                index,
            });
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shared<T>(value: T) -> Arc<RwLock<T>> {
        Arc::new(RwLock::new(value))
    }

    #[test]
    fn test_plane_boundary_is_not_a_contact() {
        let plane = shared(ImplicitGeometry::plane(DVec3::ZERO, DVec3::Y));
        let points = PointSource::Points(shared(PointSet::new(vec![
            DVec3::new(1.0, 0.0, 0.0),
            DVec3::new(2.0, -0.25, 0.0),
            DVec3::new(3.0, 0.5, 0.0),
        ])));

        let detection = CollisionDetection::for_geometry(plane, points);
        assert!(matches!(detection, CollisionDetection::PointSetToPlane { .. }));

        let data = CollisionData::new();
        detection.compute(&data);

        let contacts = data.snapshot();
        assert_eq!(contacts.len(), 1);
        assert_eq!(contacts[0].index, 1);
        assert_eq!(contacts[0].depth, 0.25);
        assert_eq!(contacts[0].direction, -DVec3::Y);
        assert_eq!(contacts[0].point, DVec3::new(2.0, -0.25, 0.0));
    }

    #[test]
    fn test_implicit_contacts() {
        let sphere = shared(ImplicitGeometry::Sphere {
            center: DVec3::ZERO,
            radius: 1.0,
        });
        let points = PointSource::Points(shared(PointSet::new(vec![
            DVec3::new(0.0, 1.0, 0.0),
            DVec3::new(0.6, 0.0, 0.0),
            DVec3::new(0.0, 0.0, -2.0),
        ])));

        let detection = CollisionDetection::for_geometry(sphere.clone(), points);
        let data = CollisionData::new();
        detection.compute(&data);

        let contacts = data.snapshot();
        assert_eq!(contacts.len(), 1);
        let contact = contacts[0];
        assert_eq!(contact.index, 1);

        let p = DVec3::new(0.6, 0.0, 0.0);
        let geometry = sphere.read();
        assert!((contact.depth - geometry.signed_distance(p).abs()).abs() < 1e-12);
        assert!((contact.direction + geometry.gradient(p).normalize()).length() < 1e-12);
    }

    #[test]
    fn test_detection_clears_previous_contacts() {
        let plane = shared(ImplicitGeometry::plane(DVec3::ZERO, DVec3::Y));
        let cloud = shared(PointSet::new(vec![DVec3::new(0.0, -1.0, 0.0)]));
        let detection = CollisionDetection::for_geometry(plane, PointSource::Points(cloud.clone()));
        let data = CollisionData::new();

        detection.compute(&data);
        assert_eq!(data.len(), 1);

        cloud.write().translate(DVec3::new(0.0, 2.0, 0.0));
        detection.compute(&data);
        assert!(data.is_empty());
    }
}
