///! Orbit propagation and coordinate conversion

mod propagator;
pub mod transform;

pub use propagator::OrbitalPropagator;
pub use transform::{
    footprint_polygon, footprint_radius_km, geodetic_to_eci, to_geodetic, to_topocentric,
};
