use std::collections::HashMap;

use crate::endpoint::{ConnectionUrl, EndpointId};
use crate::error::ResolveError;

/// Bidirectional endpoint id <-> connection url mapping.
///
/// Both directions are kept in lockstep, so for every current pair
/// `resolve(get_url(id)) == id`.
#[derive(Debug, Default)]
pub struct EndpointResolver {
    urls: HashMap<EndpointId, ConnectionUrl>,
    endpoints: HashMap<ConnectionUrl, EndpointId>,
}

impl EndpointResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `endpoint` to `url`, returning the url it was previously bound to.
    pub fn set_mapping(&mut self, endpoint: EndpointId, url: ConnectionUrl) -> Option<ConnectionUrl> {
        // A url can only belong to one endpoint; initialize refuses such
        // takeovers before it gets here.
        if let Some(owner) = self.endpoints.remove(&url) {
            if owner != endpoint {
                self.urls.remove(&owner);
            }
        }
        let previous = self.urls.insert(endpoint.clone(), url.clone());
        if let Some(old) = &previous {
            if *old != url {
                self.endpoints.remove(old);
            }
        }
        self.endpoints.insert(url, endpoint);
        previous.filter(|old| !self.endpoints.contains_key(old))
    }

    pub fn resolve(&self, url: &ConnectionUrl) -> Result<EndpointId, ResolveError> {
        self.endpoints
            .get(url)
            .cloned()
            .ok_or_else(|| ResolveError::UrlNotFound(url.clone()))
    }

    pub fn get_url(&self, endpoint: &EndpointId) -> Result<ConnectionUrl, ResolveError> {
        self.urls
            .get(endpoint)
            .cloned()
            .ok_or_else(|| ResolveError::EndpointNotFound(endpoint.clone()))
    }

    /// Drops the mapping for `endpoint` and hands back its url for cleanup.
    pub fn remove_mapping(&mut self, endpoint: &EndpointId) -> Option<ConnectionUrl> {
        let url = self.urls.remove(endpoint)?;
        self.endpoints.remove(&url);
        Some(url)
    }

    pub fn endpoints(&self) -> impl Iterator<Item = (&EndpointId, &ConnectionUrl)> {
        self.urls.iter()
    }

    pub fn len(&self) -> usize {
        self.urls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.urls.is_empty()
    }
}
