// =============================================================================
// IDENTITY
// =============================================================================
// Authentication happens upstream. The gateway forwards the authenticated
// user as headers and this service trusts them:
//
//   X-User-Id:   <uuid>              (required)
//   X-User-Role: customer | merchant | admin    (optional, default customer)
// =============================================================================

use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use uuid::Uuid;

use crate::error::AppError;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_ROLE_HEADER: &str = "x-user-role";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Customer,
    Merchant,
    Admin,
}

/// The caller of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CurrentUser {
    pub user_id: Uuid,
    pub role: Role,
}

impl CurrentUser {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    /// Owners see their own records; admins see everything.
    pub fn can_access(&self, owner_id: Uuid) -> bool {
        self.is_admin() || self.user_id == owner_id
    }

    pub fn require_admin(&self) -> Result<(), AppError> {
        if self.is_admin() {
            Ok(())
        } else {
            Err(AppError::Unauthorized("admin role required".to_string()))
        }
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user_id = parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| Uuid::parse_str(value.trim()).ok())
            .ok_or(AppError::Unauthenticated)?;

        let role = match parts
            .headers
            .get(USER_ROLE_HEADER)
            .map(|value| value.to_str().map(str::trim))
        {
            None => Role::Customer,
            Some(Ok(value)) if value.eq_ignore_ascii_case("admin") => Role::Admin,
            Some(Ok(value)) if value.eq_ignore_ascii_case("merchant") => Role::Merchant,
            Some(Ok(value)) if value.eq_ignore_ascii_case("customer") || value.is_empty() => {
                Role::Customer
            }
            Some(_) => return Err(AppError::Unauthenticated),
        };

        Ok(Self { user_id, role })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    async fn extract(headers: &[(&str, &str)]) -> Result<CurrentUser, AppError> {
        let mut builder = Request::builder().uri("/");
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        let (mut parts, _) = builder.body(()).unwrap().into_parts();
        CurrentUser::from_request_parts(&mut parts, &()).await
    }

    #[tokio::test]
    async fn missing_user_is_unauthenticated() {
        assert!(matches!(extract(&[]).await, Err(AppError::Unauthenticated)));
        assert!(matches!(
            extract(&[(USER_ID_HEADER, "not-a-uuid")]).await,
            Err(AppError::Unauthenticated)
        ));
    }

    #[tokio::test]
    async fn role_defaults_to_customer() {
        let id = Uuid::new_v4();
        let user = extract(&[(USER_ID_HEADER, &id.to_string())]).await.unwrap();
        assert_eq!(user.user_id, id);
        assert_eq!(user.role, Role::Customer);
        assert!(!user.can_access(Uuid::new_v4()));
    }

    #[tokio::test]
    async fn admin_can_access_anything() {
        let id = Uuid::new_v4().to_string();
        let user = extract(&[(USER_ID_HEADER, &id), (USER_ROLE_HEADER, "Admin")])
            .await
            .unwrap();
        assert!(user.is_admin());
        assert!(user.can_access(Uuid::new_v4()));
    }

    #[tokio::test]
    async fn merchants_are_not_admins() {
        let id = Uuid::new_v4().to_string();
        let user = extract(&[(USER_ID_HEADER, &id), (USER_ROLE_HEADER, "merchant")])
            .await
            .unwrap();
        assert_eq!(user.role, Role::Merchant);
        assert!(user.require_admin().is_err());
    }

    #[tokio::test]
    async fn unknown_role_is_rejected() {
        let id = Uuid::new_v4().to_string();
        assert!(extract(&[(USER_ID_HEADER, &id), (USER_ROLE_HEADER, "root")])
            .await
            .is_err());
    }
}
