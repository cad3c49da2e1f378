use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;

use crate::network::message::Message;
use crate::{AppError, AppResult};

/// A message handler: returns a response to send back, nothing, or an error.
///
/// Handlers run on the session's dispatch task and must return promptly;
/// work that outlives the call has to serialize itself.
pub type HandlerFn = Arc<dyn Fn(&Message) -> AppResult<Option<Message>> + Send + Sync>;

/// Routes composite `(module, action)` keys to handlers.
///
/// `module` selects a feature area, `action` an operation within it; the key
/// keeps the full eight bits of each so no two routes can collide.
pub struct Router {
    routes: DashMap<u16, HandlerFn>,
    fallback: RwLock<Option<HandlerFn>>,
}

/// Composite routing key.
pub fn router_id(module: u8, action: u8) -> u16 {
    ((module as u16) << 8) | action as u16
}

impl Router {
    pub fn new() -> Self {
        Self {
            routes: DashMap::new(),
            fallback: RwLock::new(None),
        }
    }

    /// Binds a handler; fails if the key is already bound.
    pub fn add(&self, module: u8, action: u8, handler: HandlerFn) -> AppResult<()> {
        match self.routes.entry(router_id(module, action)) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(AppError::RouterRepeated),
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                entry.insert(handler);
                Ok(())
            }
        }
    }

    /// Handler used when no route matches.
    pub fn set_fallback(&self, handler: HandlerFn) {
        *self.fallback.write() = Some(handler);
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Looks up and invokes the handler for `message`, falling back to the
    /// configured default when the key is unknown.
    pub fn dispatch(&self, message: &Message) -> AppResult<Option<Message>> {
        let handler = self
            .routes
            .get(&router_id(message.module, message.action))
            .map(|entry| entry.value().clone());

        match handler {
            Some(handler) => handler(message),
            None => {
                let fallback = self.fallback.read().clone();
                match fallback {
                    Some(handler) => handler(message),
                    None => Err(AppError::HandlerNotFound(message.module, message.action)),
                }
            }
        }
    }
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn echo() -> HandlerFn {
        Arc::new(|message: &Message| Ok(Some(Message::response(message, 0, message.payload.clone()))))
    }

    #[test]
    fn dispatches_to_bound_handler() {
        let router = Router::new();
        router.add(1, 2, echo()).unwrap();

        let request = Message::request(5, 1, 2, Bytes::from_static(b"hello"));
        let response = router.dispatch(&request).unwrap().unwrap();
        assert_eq!(response.sn, 5);
        assert_eq!(response.payload.as_ref(), b"hello");
    }

    #[test]
    fn duplicate_route_is_rejected() {
        let router = Router::new();
        router.add(1, 2, echo()).unwrap();
        assert!(matches!(
            router.add(1, 2, echo()),
            Err(AppError::RouterRepeated)
        ));
        assert_eq!(router.len(), 1);
    }

    #[test]
    fn wide_keys_do_not_collide() {
        // (1, 16) and (2, 0) collided under a four-bit module shift.
        let router = Router::new();
        router.add(1, 16, echo()).unwrap();
        router.add(2, 0, echo()).unwrap();
        assert_eq!(router.len(), 2);
        assert_ne!(router_id(1, 16), router_id(2, 0));
    }

    #[test]
    fn unknown_route_without_fallback_errors() {
        let router = Router::new();
        let request = Message::request(1, 9, 9, Bytes::new());
        assert!(matches!(
            router.dispatch(&request),
            Err(AppError::HandlerNotFound(9, 9))
        ));
    }

    #[test]
    fn fallback_receives_unknown_routes() {
        let router = Router::new();
        router.set_fallback(Arc::new(|message: &Message| {
            Ok(Some(Message::response(message, 404, Bytes::new())))
        }));

        let request = Message::request(1, 9, 9, Bytes::new());
        let response = router.dispatch(&request).unwrap().unwrap();
        assert_eq!(response.code, 404);
    }
}
