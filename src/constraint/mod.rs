//! 关节方向约束

pub mod kusudama;

pub use kusudama::{
    apply_constraint, create_cone, create_constraint, geodesic_angle, set_twist_limits,
    twist_angle, validate_constraints, Cone, ConstraintViolation, KusudamaConstraint,
};
