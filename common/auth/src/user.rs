use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::roles::{ESPECIAL_GRADO_UPLOADERS, PASANTIAS_UPLOADERS};

/// Profile of the signed-in user as returned by the repository API.
///
/// The effective role set (`rol` plus the auxiliary `roles` grants) is
/// computed when the value is built and is what every role query consults.
/// Role-bearing fields are private so the set can never go stale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "UserRepr")]
pub struct User {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub cedula: Option<String>,
    pub telefono: Option<String>,
    pub carrera: Option<i64>,
    pub carrera_display: Option<String>,
    pub rol_display: Option<String>,
    pub activo: bool,
    pub verificado: bool,
    pub fecha_registro: Option<DateTime<Utc>>,
    pub ultima_conexion: Option<DateTime<Utc>>,
    rol: String,
    roles: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    puede_subir_especial_grado: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    puede_subir_pasantias: Option<bool>,
    is_superuser: bool,
    #[serde(skip)]
    effective_roles: BTreeSet<String>,
}

impl User {
    pub fn new(id: i64, username: impl Into<String>, rol: impl Into<String>) -> Self {
        let mut user = Self {
            id,
            username: username.into(),
            email: String::new(),
            first_name: String::new(),
            last_name: String::new(),
            cedula: None,
            telefono: None,
            carrera: None,
            carrera_display: None,
            rol_display: None,
            activo: true,
            verificado: false,
            fecha_registro: None,
            ultima_conexion: None,
            rol: rol.into(),
            roles: Vec::new(),
            puede_subir_especial_grado: None,
            puede_subir_pasantias: None,
            is_superuser: false,
            effective_roles: BTreeSet::new(),
        };
        user.rebuild_roles();
        user
    }

    pub fn with_roles<I, S>(mut self, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.roles = roles.into_iter().map(Into::into).collect();
        self.rebuild_roles();
        self
    }

    /// Sets the upload capability flags explicitly instead of deriving them from roles.
    pub fn with_capabilities(mut self, especial_grado: bool, pasantias: bool) -> Self {
        self.puede_subir_especial_grado = Some(especial_grado);
        self.puede_subir_pasantias = Some(pasantias);
        self
    }

    pub fn with_superuser(mut self, is_superuser: bool) -> Self {
        self.is_superuser = is_superuser;
        self
    }

    pub fn rol(&self) -> &str {
        &self.rol
    }

    pub fn roles(&self) -> &[String] {
        &self.roles
    }

    pub fn effective_roles(&self) -> &BTreeSet<String> {
        &self.effective_roles
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.effective_roles.contains(role)
    }

    pub fn is_superuser(&self) -> bool {
        self.is_superuser
    }

    pub fn puede_subir_especial_grado(&self) -> bool {
        self.puede_subir_especial_grado
            .unwrap_or_else(|| self.holds_any(ESPECIAL_GRADO_UPLOADERS))
    }

    pub fn puede_subir_pasantias(&self) -> bool {
        self.puede_subir_pasantias
            .unwrap_or_else(|| self.holds_any(PASANTIAS_UPLOADERS))
    }

    /// Full name when the profile carries one, otherwise the username.
    pub fn display_name(&self) -> String {
        let full = format!("{} {}", self.first_name.trim(), self.last_name.trim());
        let full = full.trim();
        if full.is_empty() {
            self.username.clone()
        } else {
            full.to_string()
        }
    }

    fn holds_any(&self, roles: &[&str]) -> bool {
        roles.iter().any(|role| self.effective_roles.contains(*role))
    }

    fn rebuild_roles(&mut self) {
        self.effective_roles = std::iter::once(&self.rol)
            .chain(self.roles.iter())
            .filter(|role| !role.is_empty())
            .cloned()
            .collect();
    }
}

#[derive(Debug, Deserialize)]
struct UserRepr {
    id: i64,
    username: String,
    #[serde(default)]
    email: String,
    #[serde(default)]
    first_name: String,
    #[serde(default)]
    last_name: String,
    #[serde(default)]
    cedula: Option<String>,
    #[serde(default)]
    telefono: Option<String>,
    #[serde(default)]
    carrera: Option<i64>,
    #[serde(default)]
    carrera_display: Option<String>,
    rol: String,
    #[serde(default)]
    rol_display: Option<String>,
    #[serde(default)]
    roles: Option<Vec<String>>,
    #[serde(default = "default_active")]
    activo: bool,
    #[serde(default)]
    verificado: bool,
    #[serde(default)]
    fecha_registro: Option<DateTime<Utc>>,
    #[serde(default)]
    ultima_conexion: Option<DateTime<Utc>>,
    #[serde(default)]
    puede_subir_especial_grado: Option<bool>,
    #[serde(default)]
    puede_subir_pasantias: Option<bool>,
    #[serde(default)]
    is_superuser: bool,
}

fn default_active() -> bool {
    true
}

impl From<UserRepr> for User {
    fn from(value: UserRepr) -> Self {
        let mut user = Self {
            id: value.id,
            username: value.username,
            email: value.email,
            first_name: value.first_name,
            last_name: value.last_name,
            cedula: value.cedula,
            telefono: value.telefono,
            carrera: value.carrera,
            carrera_display: value.carrera_display,
            rol_display: value.rol_display,
            activo: value.activo,
            verificado: value.verificado,
            fecha_registro: value.fecha_registro,
            ultima_conexion: value.ultima_conexion,
            rol: value.rol,
            roles: value.roles.unwrap_or_default(),
            puede_subir_especial_grado: value.puede_subir_especial_grado,
            puede_subir_pasantias: value.puede_subir_pasantias,
            is_superuser: value.is_superuser,
            effective_roles: BTreeSet::new(),
        };
        user.rebuild_roles();
        user
    }
}
