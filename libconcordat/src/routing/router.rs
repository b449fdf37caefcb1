// Copyright 2021-2022 Cargill Incorporated
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::document::ShardId;
use crate::error::RoutingError;

use super::RoutingCatalog;

/// A query router holding a possibly outdated copy of the routing versions.
///
/// A stale cache is refreshed from the catalog and the request retried once; the router never
/// waits for an operation to leave its critical section.
pub struct Router {
    catalog: Arc<RoutingCatalog>,
    cache: Mutex<HashMap<String, u64>>,
}

impl Router {
    pub fn new(catalog: Arc<RoutingCatalog>) -> Self {
        Router {
            catalog,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the routing version the router currently believes in, if it has one.
    pub fn cached_version(&self, namespace: &str) -> Option<u64> {
        self.cache.lock().get(namespace).copied()
    }

    pub fn refresh(&self, namespace: &str) -> Result<u64, RoutingError> {
        let version = self.catalog.version(namespace)?;
        self.cache.lock().insert(namespace.to_string(), version);
        Ok(version)
    }

    pub fn route_read(&self, namespace: &str, key: i64) -> Result<ShardId, RoutingError> {
        self.route(namespace, key, false)
    }

    pub fn route_write(&self, namespace: &str, key: i64) -> Result<ShardId, RoutingError> {
        self.route(namespace, key, true)
    }

    fn route(&self, namespace: &str, key: i64, is_write: bool) -> Result<ShardId, RoutingError> {
        let known = match self.cached_version(namespace) {
            Some(version) => version,
            None => self.refresh(namespace)?,
        };
        match self.catalog.route(namespace, key, known, is_write) {
            Ok(route) => Ok(route.shard),
            Err(RoutingError::StaleVersion { current, .. }) => {
                debug!(
                    "Router refreshing {} from version {} to {}",
                    namespace, known, current
                );
                self.cache.lock().insert(namespace.to_string(), current);
                self.catalog
                    .route(namespace, key, current, is_write)
                    .map(|route| route.shard)
            }
            Err(err) => Err(err),
        }
    }
}
