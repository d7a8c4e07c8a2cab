//! # Sistema de Routing
//! src/router/mod.rs
//!
//! Tabla que mapea `(method, path)` a un handler que produce una respuesta fija.
//!
//! ```text
//! RequestLine → Router → Handler → Response
//! ```
//!
//! La coincidencia es exacta sobre ambos componentes (el método es parte de
//! la clave), así que `POST /api/hello` cae en 404. El router no hace I/O y
//! es total: cualquier par de strings produce una respuesta.

use crate::http::{Response, StatusCode};
use std::collections::HashMap;

/// Tipo de función handler
///
/// No recibe el request: todas las respuestas son canned.
pub type Handler = fn() -> Response;

/// Body que devuelve `GET /api/hello`
pub const HELLO_BODY: &str = r#"{"message": "Hello, World!"}"#;

/// Router que mapea `(method, path)` a handlers
pub struct Router {
    routes: HashMap<(String, String), Handler>,
}

impl Router {
    /// Crea un nuevo router vacío (todo resuelve a 404)
    pub fn new() -> Self {
        Self {
            routes: HashMap::new(),
        }
    }

    /// Router con la tabla por defecto: `GET /api/hello`
    pub fn with_default_routes() -> Self {
        let mut router = Self::new();
        router.register("GET", "/api/hello", hello_handler);
        router
    }

    /// Registra una ruta con su handler
    ///
    /// Registrar dos veces el mismo par reemplaza el handler anterior.
    ///
    /// # Ejemplo
    /// ```
    /// use hello_server::router::Router;
    /// use hello_server::http::{Response, StatusCode};
    ///
    /// fn pong() -> Response {
    ///     Response::plain(StatusCode::Ok)
    /// }
    ///
    /// let mut router = Router::new();
    /// router.register("GET", "/ping", pong);
    /// assert_eq!(router.resolve("GET", "/ping").status(), StatusCode::Ok);
    /// ```
    pub fn register(&mut self, method: &str, path: &str, handler: Handler) {
        self.routes
            .insert((method.to_string(), path.to_string()), handler);
    }

    /// Resuelve un request a su respuesta
    ///
    /// Si no hay handler para el par, retorna 404 Not Found.
    pub fn resolve(&self, method: &str, path: &str) -> Response {
        // (String, String) no implementa Borrow<(&str, &str)>
        let key = (method.to_string(), path.to_string());

        match self.routes.get(&key) {
            Some(handler) => handler(),
            None => not_found_handler(),
        }
    }

    /// Número de rutas registradas
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Verifica si no hay rutas registradas
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

impl Default for Router {
    fn default() -> Self {
        Self::with_default_routes()
    }
}

/// `GET /api/hello`
pub fn hello_handler() -> Response {
    Response::json(StatusCode::Ok, HELLO_BODY)
}

/// Respuesta para cualquier par no registrado
pub fn not_found_handler() -> Response {
    Response::plain(StatusCode::NotFound)
}
