// =============================================================================
// APPLICATION STATE & ROUTER
// =============================================================================
// Wires the services to one store and exposes them over HTTP. The binary and
// the API tests both build the app through `AppState::new` + `build_router`,
// so the tests drive exactly the production routing.
// =============================================================================

use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{MatchedPath, Request},
    middleware::{self, Next},
    response::Response,
    routing::{get, post, put},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::cache::FlashSaleCache;
use crate::cart::CartService;
use crate::flash_sales::FlashSaleService;
use crate::handlers;
use crate::metrics;
use crate::notify::Notifier;
use crate::orders::{OrderCoordinator, OrderLifecycle};
use crate::store::Store;

// -----------------------------------------------------------------------------
// APPLICATION STATE
// -----------------------------------------------------------------------------
// Shared by every handler through State<Arc<AppState>>.
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub cart: CartService,
    pub orders: OrderCoordinator,
    pub lifecycle: OrderLifecycle,
    pub flash_sales: FlashSaleService,
    pub cache: FlashSaleCache,

    /// `None` when no recorder is installed (tests)
    pub metrics_handle: Option<PrometheusHandle>,
}

impl AppState {
    pub fn new(
        store: Arc<dyn Store>,
        cache: FlashSaleCache,
        notifier: Arc<dyn Notifier>,
        metrics_handle: Option<PrometheusHandle>,
    ) -> Self {
        Self {
            cart: CartService::new(Arc::clone(&store)),
            orders: OrderCoordinator::new(Arc::clone(&store), Arc::clone(&notifier)),
            lifecycle: OrderLifecycle::new(Arc::clone(&store), Arc::clone(&notifier)),
            flash_sales: FlashSaleService::new(Arc::clone(&store), cache.clone(), notifier),
            cache,
            store,
            metrics_handle,
        }
    }
}

// -----------------------------------------------------------------------------
// HTTP METRICS MIDDLEWARE
// -----------------------------------------------------------------------------
// Labels use the route template (/api/v1/orders/:id), never the raw path.
async fn track_http(req: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = req.method().to_string();
    let endpoint = req
        .extensions()
        .get::<MatchedPath>()
        .map(|path| path.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());

    let response = next.run(req).await;

    metrics::record_http_request(
        &method,
        &endpoint,
        response.status().as_u16(),
        start.elapsed().as_secs_f64(),
    );
    response
}

// -----------------------------------------------------------------------------
// ROUTES
// -----------------------------------------------------------------------------
pub fn build_router(state: Arc<AppState>) -> Router {
    let api = Router::new()
        // ----- Catalog -----
        .route("/products", get(handlers::products::list_products))
        .route("/products/:id", get(handlers::products::get_product))
        // ----- Cart -----
        .route(
            "/cart",
            get(handlers::cart::get_cart).delete(handlers::cart::clear_cart),
        )
        .route("/cart/items", post(handlers::cart::add_item))
        .route(
            "/cart/items/:id",
            put(handlers::cart::update_item).delete(handlers::cart::remove_item),
        )
        .route("/cart/validate", post(handlers::cart::validate_cart))
        .route("/cart/checkout", post(handlers::cart::checkout))
        // ----- Orders -----
        .route(
            "/orders",
            get(handlers::orders::list_orders).post(handlers::orders::create_order),
        )
        .route("/orders/:id", get(handlers::orders::get_order))
        .route("/orders/:id/status", put(handlers::orders::update_status))
        .route("/orders/:id/cancel", put(handlers::orders::cancel_order))
        // ----- Flash sales -----
        .route(
            "/flash-sales",
            get(handlers::flash_sales::list_flash_sales)
                .post(handlers::flash_sales::create_flash_sale),
        )
        .route(
            "/flash-sales/:id",
            get(handlers::flash_sales::get_flash_sale)
                .put(handlers::flash_sales::update_flash_sale)
                .delete(handlers::flash_sales::delete_flash_sale),
        )
        .route(
            "/admin/flash-sales",
            get(handlers::flash_sales::list_all_flash_sales),
        );

    Router::new()
        // ----- Health, readiness & metrics -----
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check))
        .route("/metrics", get(handlers::metrics_handler))
        .nest("/api/v1", api)
        // ----- Middleware Layers -----
        .layer(middleware::from_fn(track_http))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
