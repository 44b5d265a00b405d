pub mod error;
pub mod guards;
pub mod roles;
pub mod user;

pub use error::{AuthError, AuthResult};
pub use guards::{
    can_upload, ensure_any_role, ensure_role, guard_route, has_any_role, has_role, GuardError,
    RouteDecision,
};
pub use roles::{
    WorkType, ROLE_ADMINISTRADOR, ROLE_ENCARGADO_ESPECIAL_GRADO, ROLE_ENCARGADO_PASANTIAS,
    ROLE_ESTUDIANTE, ROLE_SUPERUSER_ESPECIAL_GRADO, ROLE_SUPERUSER_PASANTIAS,
};
pub use user::User;
