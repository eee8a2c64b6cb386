use diesel::pg::Pg;
use diesel::prelude::*;
use diesel::sql_types::Integer;
use thiserror::Error;

use crate::auth::SessionContext;
use crate::error::AppError;
use crate::schema::{document_departments, document_plants, documents};

#[derive(Debug, Error)]
pub enum ScopeError {
    #[error("session has no plant or department assignment, please sign in again")]
    IncompleteScope,
}

impl From<ScopeError> for AppError {
    fn from(value: ScopeError) -> Self {
        AppError::new(axum::http::StatusCode::UNAUTHORIZED, value.to_string())
    }
}

/// Which documents a session may see.
///
/// Admins are unrestricted. Everyone else sees a document only when it shares
/// at least one plant with the session and, independently, at least one
/// department.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessScope {
    Unrestricted,
    Restricted {
        plant_ids: Vec<i32>,
        department_ids: Vec<i32>,
    },
}

impl AccessScope {
    pub fn for_session(session: &SessionContext) -> Result<Self, ScopeError> {
        if session.is_admin() {
            return Ok(AccessScope::Unrestricted);
        }

        if session.plant_ids.is_empty() || session.department_ids.is_empty() {
            tracing::warn!(
                user_id = session.user_id,
                "session rejected: incomplete plant/department scope"
            );
            return Err(ScopeError::IncompleteScope);
        }

        Ok(AccessScope::Restricted {
            plant_ids: session.plant_ids.clone(),
            department_ids: session.department_ids.clone(),
        })
    }

    pub fn is_unrestricted(&self) -> bool {
        matches!(self, AccessScope::Unrestricted)
    }

    pub fn permits(&self, document_plants: &[i32], document_departments: &[i32]) -> bool {
        match self {
            AccessScope::Unrestricted => true,
            AccessScope::Restricted {
                plant_ids,
                department_ids,
            } => {
                document_plants.iter().any(|id| plant_ids.contains(id))
                    && document_departments
                        .iter()
                        .any(|id| department_ids.contains(id))
            }
        }
    }

    /// Ids of every document this scope can see, as a composable sub-select.
    pub fn visible_document_ids(&self) -> documents::BoxedQuery<'static, Pg, Integer> {
        let query = documents::table.select(documents::id).into_boxed();
        match self {
            AccessScope::Unrestricted => query,
            AccessScope::Restricted {
                plant_ids,
                department_ids,
            } => query
                .filter(
                    documents::id.eq_any(
                        document_plants::table
                            .filter(document_plants::plant_id.eq_any(plant_ids.clone()))
                            .select(document_plants::document_id),
                    ),
                )
                .filter(
                    documents::id.eq_any(
                        document_departments::table
                            .filter(
                                document_departments::department_id.eq_any(department_ids.clone()),
                            )
                            .select(document_departments::document_id),
                    ),
                ),
        }
    }

    pub fn document_visible(&self, conn: &mut PgConnection, document_id: i32) -> QueryResult<bool> {
        let found = self
            .visible_document_ids()
            .filter(documents::id.eq(document_id))
            .first::<i32>(conn)
            .optional()?;
        Ok(found.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::{AccessScope, ScopeError};
    use crate::auth::{Role, SessionContext};

    fn session(role: Role, plants: &[i32], departments: &[i32]) -> SessionContext {
        SessionContext {
            user_id: 1,
            username: "someone".into(),
            role,
            plant_ids: plants.to_vec(),
            department_ids: departments.to_vec(),
        }
    }

    #[test]
    fn admin_is_unrestricted_even_without_assignments() {
        let scope = AccessScope::for_session(&session(Role::Admin, &[], &[])).unwrap();
        assert!(scope.is_unrestricted());
        assert!(scope.permits(&[99], &[42]));
    }

    #[test]
    fn user_without_plants_or_departments_is_rejected() {
        assert!(matches!(
            AccessScope::for_session(&session(Role::User, &[], &[2])),
            Err(ScopeError::IncompleteScope)
        ));
        assert!(matches!(
            AccessScope::for_session(&session(Role::User, &[1], &[])),
            Err(ScopeError::IncompleteScope)
        ));
    }

    #[test]
    fn requires_overlap_on_both_relations() {
        let scope = AccessScope::for_session(&session(Role::User, &[1], &[2])).unwrap();
        assert!(scope.permits(&[1, 5], &[2]));
        assert!(!scope.permits(&[3], &[2]));
        assert!(!scope.permits(&[1], &[4]));
        assert!(!scope.permits(&[], &[]));
    }

    #[test]
    fn relations_are_checked_independently() {
        let scope = AccessScope::for_session(&session(Role::User, &[1, 2], &[10, 20])).unwrap();
        // plant 1 with department 20 was never paired anywhere, still visible
        assert!(scope.permits(&[1], &[20]));
    }
}
