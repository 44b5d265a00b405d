use std::fmt;
use std::str::FromStr;

use thiserror::Error;

pub const ROLE_ESTUDIANTE: &str = "estudiante";
pub const ROLE_ENCARGADO_ESPECIAL_GRADO: &str = "encargado_especial_grado";
pub const ROLE_SUPERUSER_ESPECIAL_GRADO: &str = "superuser_especial_grado";
pub const ROLE_ENCARGADO_PASANTIAS: &str = "encargado_pasantias";
pub const ROLE_SUPERUSER_PASANTIAS: &str = "superuser_pasantias";
pub const ROLE_ADMINISTRADOR: &str = "administrador";

pub const ALL_ROLES: &[&str] = &[
    ROLE_ESTUDIANTE,
    ROLE_ENCARGADO_ESPECIAL_GRADO,
    ROLE_SUPERUSER_ESPECIAL_GRADO,
    ROLE_ENCARGADO_PASANTIAS,
    ROLE_SUPERUSER_PASANTIAS,
    ROLE_ADMINISTRADOR,
];

/// Roles the backend lets upload special degree works.
pub const ESPECIAL_GRADO_UPLOADERS: &[&str] = &[
    ROLE_ENCARGADO_ESPECIAL_GRADO,
    ROLE_SUPERUSER_ESPECIAL_GRADO,
    ROLE_ADMINISTRADOR,
];

/// Roles the backend lets upload professional internship reports.
pub const PASANTIAS_UPLOADERS: &[&str] = &[
    ROLE_ENCARGADO_PASANTIAS,
    ROLE_SUPERUSER_PASANTIAS,
    ROLE_ADMINISTRADOR,
];

/// Kinds of academic work a user may upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkType {
    EspecialGrado,
    PracticasProfesionales,
}

impl WorkType {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkType::EspecialGrado => "especial_grado",
            WorkType::PracticasProfesionales => "practicas_profesionales",
        }
    }
}

impl fmt::Display for WorkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown work type '{0}'")]
pub struct UnknownWorkType(pub String);

impl FromStr for WorkType {
    type Err = UnknownWorkType;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "especial_grado" => Ok(WorkType::EspecialGrado),
            "practicas_profesionales" => Ok(WorkType::PracticasProfesionales),
            other => Err(UnknownWorkType(other.to_string())),
        }
    }
}
