use chrono::Utc;
use sea_orm::ActiveValue::NotSet;
use sea_orm::sea_query::{Expr, LockType};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, DatabaseTransaction, DbErr, EntityTrait,
    FromQueryResult, JoinType, PaginatorTrait, QueryFilter, QueryOrder, QuerySelect,
    RelationTrait, Set, TransactionTrait,
};
use uuid::Uuid;

use crate::{
    audit::log_audit,
    dto::orders::{OrderList, OrderWithItems},
    entity::{
        cart_items::{self, Column as CartCol, Entity as CartItems},
        order_items::{
            ActiveModel as OrderItemActive, Column as OrderItemCol, Entity as OrderItems,
            Model as OrderItemModel,
        },
        orders::{
            ActiveModel as OrderActive, Column as OrderCol, Entity as Orders, Model as OrderModel,
        },
        products::{Column as ProdCol, Entity as Products},
    },
    error::{AppError, AppResult},
    middleware::auth::AuthUser,
    models::{Order, OrderItem},
    response::{ApiResponse, Meta},
    routes::params::{OrderListQuery, SortOrder},
    state::AppState,
};

/// One cart row joined with its product, read under row locks at the start of
/// checkout. `unit_price` and `stock` are reused for the whole operation and
/// never re-fetched.
#[derive(Debug, FromQueryResult)]
struct CartLine {
    product_id: Uuid,
    unit_price: i64,
    quantity: i32,
    stock: i32,
}

/// Place an order from the user's cart as one atomic unit: snapshot the cart,
/// validate stock, insert the order and its items, decrement inventory, and
/// clear the cart. Validation runs inside the transaction with the product
/// rows locked, so two concurrent checkouts for the same product cannot both
/// pass the stock check. The decrement itself is still conditional; losing it
/// surfaces as `InsufficientStock` and rolls everything back.
pub async fn checkout(state: &AppState, user: &AuthUser) -> AppResult<ApiResponse<OrderWithItems>> {
    let txn = state.orm.begin().await.map_err(|err| {
        tracing::error!(error = %err, "failed to begin checkout transaction");
        AppError::StorageUnavailable
    })?;

    let lines = match load_cart_snapshot(&txn, user.user_id).await {
        Ok(lines) => lines,
        Err(err) => {
            tracing::error!(error = %err, "cart snapshot read failed");
            txn.rollback().await.ok();
            return Err(AppError::StorageUnavailable);
        }
    };

    let total = match validate_snapshot(&lines) {
        Ok(total) => total,
        Err(err) => {
            txn.rollback().await.ok();
            return Err(err);
        }
    };

    let (order, items) = match persist_order(&txn, user.user_id, &lines, total).await {
        Ok(pair) => pair,
        Err(err @ AppError::InsufficientStock(_)) => {
            txn.rollback().await.ok();
            return Err(err);
        }
        Err(err) => {
            tracing::error!(error = %err, "order persistence failed, rolling back");
            txn.rollback().await.ok();
            return Err(AppError::OrderPersistenceFailed);
        }
    };

    if let Err(err) = txn.commit().await {
        tracing::error!(error = %err, "checkout commit failed");
        return Err(AppError::OrderPersistenceFailed);
    }

    if let Err(err) = log_audit(
        &state.pool,
        Some(user.user_id),
        "checkout",
        Some("orders"),
        Some(serde_json::json!({ "order_id": order.id, "total_amount": order.total_amount })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    Ok(ApiResponse::success(
        "Order placed",
        OrderWithItems {
            order: order_from_entity(order),
            items: items.into_iter().map(order_item_from_entity).collect(),
        },
        Some(Meta::empty()),
    ))
}

async fn load_cart_snapshot(
    txn: &DatabaseTransaction,
    user_id: Uuid,
) -> Result<Vec<CartLine>, DbErr> {
    CartItems::find()
        .select_only()
        .column_as(CartCol::ProductId, "product_id")
        .column_as(CartCol::Quantity, "quantity")
        .column_as(ProdCol::Price, "unit_price")
        .column_as(ProdCol::Stock, "stock")
        .join(JoinType::InnerJoin, cart_items::Relation::Products.def())
        .filter(CartCol::UserId.eq(user_id))
        .lock(LockType::Update)
        .into_model::<CartLine>()
        .all(txn)
        .await
}

/// Pure validation over the snapshot. Empty cart is reported before any stock
/// check; the first under-stocked line wins even when later lines are fine.
/// Returns the order total computed from the snapshot prices.
fn validate_snapshot(lines: &[CartLine]) -> AppResult<i64> {
    if lines.is_empty() {
        return Err(AppError::EmptyCart);
    }

    let mut total: i64 = 0;
    for line in lines {
        if line.quantity <= 0 {
            return Err(AppError::BadRequest("Cart has invalid quantity".into()));
        }
        if line.stock < line.quantity {
            return Err(AppError::InsufficientStock(line.product_id));
        }
        total += line.unit_price * i64::from(line.quantity);
    }
    Ok(total)
}

async fn persist_order(
    txn: &DatabaseTransaction,
    user_id: Uuid,
    lines: &[CartLine],
    total: i64,
) -> AppResult<(OrderModel, Vec<OrderItemModel>)> {
    let order = OrderActive {
        id: Set(Uuid::new_v4()),
        user_id: Set(user_id),
        total_amount: Set(total),
        status: Set("placed".into()),
        created_at: NotSet,
        updated_at: NotSet,
    }
    .insert(txn)
    .await?;

    let mut items: Vec<OrderItemModel> = Vec::with_capacity(lines.len());
    for line in lines {
        let item = OrderItemActive {
            id: Set(Uuid::new_v4()),
            order_id: Set(order.id),
            product_id: Set(line.product_id),
            quantity: Set(line.quantity),
            price: Set(line.unit_price),
            created_at: NotSet,
        }
        .insert(txn)
        .await?;
        items.push(item);

        // Conditional decrement: refuses to go below zero even if a
        // concurrent writer slipped past the locked snapshot.
        let updated = Products::update_many()
            .col_expr(ProdCol::Stock, Expr::col(ProdCol::Stock).sub(line.quantity))
            .filter(ProdCol::Id.eq(line.product_id))
            .filter(ProdCol::Stock.gte(line.quantity))
            .exec(txn)
            .await?;
        if updated.rows_affected == 0 {
            return Err(AppError::InsufficientStock(line.product_id));
        }
    }

    CartItems::delete_many()
        .filter(CartCol::UserId.eq(user_id))
        .exec(txn)
        .await?;

    Ok((order, items))
}

pub async fn list_orders(
    state: &AppState,
    user: &AuthUser,
    query: OrderListQuery,
) -> AppResult<ApiResponse<OrderList>> {
    let (page, limit, offset) = query.pagination.normalize();
    let mut condition = Condition::all().add(OrderCol::UserId.eq(user.user_id));
    if let Some(status) = query.status.as_ref().filter(|s| !s.is_empty()) {
        condition = condition.add(OrderCol::Status.eq(status.clone()));
    }

    let sort_order = query.sort_order.unwrap_or(SortOrder::Desc);

    let mut finder = Orders::find().filter(condition);
    finder = match sort_order {
        SortOrder::Asc => finder.order_by_asc(OrderCol::CreatedAt),
        SortOrder::Desc => finder.order_by_desc(OrderCol::CreatedAt),
    };

    let total = finder.clone().count(&state.orm).await? as i64;

    let orders = finder
        .limit(limit as u64)
        .offset(offset as u64)
        .all(&state.orm)
        .await?
        .into_iter()
        .map(order_from_entity)
        .collect();

    let meta = Meta::new(page, limit, total);
    Ok(ApiResponse::success(
        "Ok",
        OrderList { items: orders },
        Some(meta),
    ))
}

pub async fn get_order(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
) -> AppResult<ApiResponse<OrderWithItems>> {
    let order = Orders::find()
        .filter(
            Condition::all()
                .add(OrderCol::UserId.eq(user.user_id))
                .add(OrderCol::Id.eq(id)),
        )
        .one(&state.orm)
        .await?;
    let order = match order {
        Some(o) => o,
        None => return Err(AppError::NotFound),
    };

    let items = OrderItems::find()
        .filter(OrderItemCol::OrderId.eq(order.id))
        .all(&state.orm)
        .await?
        .into_iter()
        .map(order_item_from_entity)
        .collect();

    Ok(ApiResponse::success(
        "OK",
        OrderWithItems {
            order: order_from_entity(order),
            items,
        },
        Some(Meta::empty()),
    ))
}

fn order_from_entity(model: OrderModel) -> Order {
    Order {
        id: model.id,
        user_id: model.user_id,
        total_amount: model.total_amount,
        status: model.status,
        created_at: model.created_at.with_timezone(&Utc),
        updated_at: model.updated_at.with_timezone(&Utc),
    }
}

fn order_item_from_entity(model: OrderItemModel) -> OrderItem {
    OrderItem {
        id: model.id,
        order_id: model.order_id,
        product_id: model.product_id,
        quantity: model.quantity,
        price: model.price,
        created_at: model.created_at.with_timezone(&Utc),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(product_id: Uuid, unit_price: i64, quantity: i32, stock: i32) -> CartLine {
        CartLine {
            product_id,
            unit_price,
            quantity,
            stock,
        }
    }

    #[test]
    fn empty_cart_is_rejected_before_any_stock_check() {
        let err = validate_snapshot(&[]).unwrap_err();
        assert!(matches!(err, AppError::EmptyCart));
    }

    #[test]
    fn first_understocked_line_wins() {
        let short = Uuid::new_v4();
        let lines = vec![
            line(Uuid::new_v4(), 1000, 2, 5),
            line(short, 500, 3, 1),
            line(Uuid::new_v4(), 200, 1, 0),
        ];
        let err = validate_snapshot(&lines).unwrap_err();
        match err {
            AppError::InsufficientStock(id) => assert_eq!(id, short),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn understock_is_reported_even_when_other_lines_are_fine() {
        let short = Uuid::new_v4();
        let lines = vec![line(Uuid::new_v4(), 1000, 1, 10), line(short, 100, 3, 1)];
        assert!(matches!(
            validate_snapshot(&lines),
            Err(AppError::InsufficientStock(id)) if id == short
        ));
    }

    #[test]
    fn non_positive_quantity_is_invalid() {
        let lines = vec![line(Uuid::new_v4(), 1000, 0, 5)];
        assert!(matches!(
            validate_snapshot(&lines),
            Err(AppError::BadRequest(_))
        ));
    }

    #[test]
    fn total_is_the_sum_of_snapshot_subtotals() {
        let lines = vec![
            line(Uuid::new_v4(), 1000, 2, 5),
            line(Uuid::new_v4(), 250, 4, 10),
        ];
        assert_eq!(validate_snapshot(&lines).unwrap(), 2 * 1000 + 4 * 250);
    }

    #[test]
    fn exact_stock_is_enough() {
        let lines = vec![line(Uuid::new_v4(), 1000, 5, 5)];
        assert_eq!(validate_snapshot(&lines).unwrap(), 5000);
    }
}
