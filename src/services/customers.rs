use crate::{
    db::DbPool,
    entities::customer,
    errors::ServiceError,
    events::{Event, EventSender},
};
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, Set,
};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Resolves a customer by name, creating the record when the name is new.
/// Sales are attached to customers; the name is the resolution key the
/// point-of-sale flow works with.
pub async fn find_or_create_customer<C: ConnectionTrait>(
    conn: &C,
    name: &str,
    phone: Option<&str>,
) -> Result<(customer::Model, bool), ServiceError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(ServiceError::ValidationError(
            "Customer name must not be empty".to_string(),
        ));
    }

    if let Some(found) = customer::Entity::find()
        .filter(customer::Column::Name.eq(trimmed))
        .one(conn)
        .await?
    {
        return Ok((found, false));
    }

    let created = customer::ActiveModel {
        id: Set(Uuid::new_v4()),
        name: Set(trimmed.to_string()),
        phone: Set(phone.map(|p| p.to_string())),
        created_at: Set(Utc::now()),
        updated_at: Set(None),
    }
    .insert(conn)
    .await?;

    Ok((created, true))
}

/// Service for managing customers
#[derive(Clone)]
pub struct CustomerService {
    db_pool: Arc<DbPool>,
    event_sender: Arc<EventSender>,
}

impl CustomerService {
    pub fn new(db_pool: Arc<DbPool>, event_sender: Arc<EventSender>) -> Self {
        Self {
            db_pool,
            event_sender,
        }
    }

    /// Resolves-or-creates a customer by name
    #[instrument(skip(self))]
    pub async fn resolve(
        &self,
        name: &str,
        phone: Option<&str>,
    ) -> Result<customer::Model, ServiceError> {
        let (found, created) = find_or_create_customer(&*self.db_pool, name, phone).await?;
        if created {
            info!(customer_id = %found.id, "customer created");
            if let Err(e) = self.event_sender.send(Event::CustomerCreated(found.id)).await {
                warn!(error = %e, customer_id = %found.id, "failed to send customer created event");
            }
        }
        Ok(found)
    }

    /// Gets a customer by ID
    #[instrument(skip(self))]
    pub async fn get_customer(&self, customer_id: Uuid) -> Result<Option<customer::Model>, ServiceError> {
        let found = customer::Entity::find_by_id(customer_id)
            .one(&*self.db_pool)
            .await?;
        Ok(found)
    }

    /// Lists customers with pagination, alphabetically
    #[instrument(skip(self))]
    pub async fn list_customers(
        &self,
        page: u64,
        limit: u64,
    ) -> Result<(Vec<customer::Model>, u64), ServiceError> {
        let paginator = customer::Entity::find()
            .order_by_asc(customer::Column::Name)
            .paginate(&*self.db_pool, limit);

        let total = paginator.num_items().await?;
        let customers = paginator.fetch_page(page.saturating_sub(1)).await?;

        Ok((customers, total))
    }
}
