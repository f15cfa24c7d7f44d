use crate::{
    audit::log_audit,
    db::DbPool,
    dto::contact::ContactRequest,
    error::{AppError, AppResult},
    models::ContactMessage,
    response::{ApiResponse, Meta},
};
use uuid::Uuid;

pub async fn submit_message(
    pool: &DbPool,
    payload: ContactRequest,
) -> AppResult<ApiResponse<ContactMessage>> {
    let name = payload.name.trim().to_string();
    let email = payload.email.trim().to_string();
    let subject = payload.subject.trim().to_string();
    let message = payload.message.trim().to_string();

    if name.is_empty() || email.is_empty() || subject.is_empty() || message.is_empty() {
        return Err(AppError::BadRequest("All fields are required".to_string()));
    }
    if !looks_like_email(&email) {
        return Err(AppError::BadRequest("Invalid email format".to_string()));
    }

    let saved: ContactMessage = sqlx::query_as(
        r#"
        INSERT INTO contact_messages (id, user_id, name, email, subject, message)
        VALUES ($1, $2, $3, $4, $5, $6)
        RETURNING *
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(payload.user_id)
    .bind(name)
    .bind(email)
    .bind(subject)
    .bind(message)
    .fetch_one(pool)
    .await?;

    if let Err(err) = log_audit(
        pool,
        payload.user_id,
        "contact_message",
        Some("contact_messages"),
        Some(serde_json::json!({ "message_id": saved.id })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    Ok(ApiResponse::success(
        "Your message has been sent successfully. We'll get back to you soon!",
        saved,
        Some(Meta::empty()),
    ))
}

// local-part@domain with a dot somewhere in the domain, no whitespace.
fn looks_like_email(s: &str) -> bool {
    let Some((local, domain)) = s.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.is_empty()
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
        && !s.contains(char::is_whitespace)
        && !domain.contains('@')
}

#[cfg(test)]
mod tests {
    use super::looks_like_email;

    #[test]
    fn accepts_plain_addresses() {
        assert!(looks_like_email("user@example.com"));
        assert!(looks_like_email("a.b+tag@sub.example.org"));
    }

    #[test]
    fn rejects_malformed_addresses() {
        assert!(!looks_like_email("userexample.com"));
        assert!(!looks_like_email("@example.com"));
        assert!(!looks_like_email("user@"));
        assert!(!looks_like_email("user@nodot"));
        assert!(!looks_like_email("user@.com"));
        assert!(!looks_like_email("user@example.com."));
        assert!(!looks_like_email("us er@example.com"));
        assert!(!looks_like_email("user@ex@ample.com"));
    }
}
