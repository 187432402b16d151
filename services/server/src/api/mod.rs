//! HTTP API: uniform resource routes, custom transitions, admin surface.

pub mod admin;
pub mod custom;
pub mod error;
pub mod middleware;
pub mod params;
pub mod resources;

use crate::app::AppState;
use crate::catalog::{DeleteBehavior, RouteSet, CATALOG};
use axum::extract::{Path, Request, State};
use axum::routing::{delete as on_delete, get, post};
use axum::Router;

/// Routes for every catalog row, built from the table; adding a resource
/// type never touches this function.
pub fn resource_router() -> Router<AppState> {
    let mut router = Router::new();
    for spec in CATALOG {
        let base = format!("/v1/{}", spec.path);
        let by_id = format!("{base}/:id");
        match spec.routes {
            RouteSet::Full => {
                router = router.route(
                    &base,
                    get(move |state: State<AppState>, req: Request| {
                        resources::list(spec, state, req)
                    })
                    .post(move |state: State<AppState>, req: Request| {
                        resources::create(spec, state, req)
                    }),
                );
                let mut handlers = get(
                    move |state: State<AppState>, path: Path<String>, req: Request| {
                        resources::retrieve(spec, state, path, req)
                    },
                )
                .post(
                    move |state: State<AppState>, path: Path<String>, req: Request| {
                        resources::update(spec, state, path, req)
                    },
                );
                if spec.delete != DeleteBehavior::Disabled {
                    handlers = handlers.delete(
                        move |state: State<AppState>, path: Path<String>| {
                            resources::delete(spec, state, path)
                        },
                    );
                }
                router = router.route(&by_id, handlers);
            }
            RouteSet::ReadOnly => {
                router = router
                    .route(
                        &base,
                        get(move |state: State<AppState>, req: Request| {
                            resources::list(spec, state, req)
                        }),
                    )
                    .route(
                        &by_id,
                        get(move |state: State<AppState>, path: Path<String>, req: Request| {
                            resources::retrieve(spec, state, path, req)
                        }),
                    );
            }
        }
    }

    router
        .route(
            "/v1/payment_methods/:id/attach",
            post(custom::attach_payment_method),
        )
        .route(
            "/v1/payment_methods/:id/detach",
            post(custom::detach_payment_method),
        )
        .route(
            "/v1/checkout/sessions/:id/complete",
            post(custom::complete_checkout_session),
        )
}

pub fn admin_router() -> Router<AppState> {
    Router::new()
        .route("/healthz", get(admin::health))
        .route("/_config/webhooks/:id", post(admin::register_webhook))
        .route("/_config/data", on_delete(admin::flush_data))
        .route("/_config/time", get(admin::clock_info))
        .route("/_config/time/advance", post(admin::advance_time))
        .route("/_config/time/mode", post(admin::set_clock_mode))
        .route("/_config/chaos", post(admin::configure_chaos))
        .route("/_config/chaos/reset", post(admin::reset_chaos))
        .route("/_config/chaos/stats", get(admin::chaos_stats))
        .route("/_config/chaos/flush", post(admin::flush_chaos_events))
        .route("/_config/billing/run", post(admin::run_billing))
}
