//! CORS support (§4.6): three headers on every reply plus a catch-all
//! `OPTIONS` route answering with an empty 200.

use crate::response::Response;
use crate::router::Router;

pub fn install(router: &mut Router) {
    router.reply_hook(|response: &mut Response| {
        response.set_header("Access-Control-Allow-Origin", "*");
        response.set_header(
            "Access-Control-Allow-Headers",
            "Content-Type, Authorization",
        );
        response.set_header("Access-Control-Allow-Methods", "GET, POST, OPTIONS");
    });
    router.route("OPTIONS", "", |_| Ok(Response::empty(200)));
}
