//! Space authorization.
//!
//! Decides which private spaces a reader may see. Accounts always see
//! their own space. A capability with a writing role delegates access to
//! the issuing space. A peer acting as the site server of a space may
//! read that space when it asks for its resources.

use std::collections::{BTreeSet, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;

use hypersync_core::{AccountId, Iri, PeerId, SpaceId};

use crate::error::{PermsError, Result};

/// Source of authorization decisions for reconciliation.
#[async_trait]
pub trait SpaceAuthority: Send + Sync {
    /// Spaces readable by any of `accounts`.
    async fn authorized_spaces(&self, accounts: &[AccountId]) -> Result<Vec<SpaceId>>;

    /// Spaces readable by `peer`, given the resources it is asking for.
    async fn authorized_spaces_for_peer(
        &self,
        peer: &PeerId,
        requested: &[Iri],
    ) -> Result<Vec<SpaceId>>;

    /// Site URL a space is served from, if any.
    async fn site_url(&self, space: &SpaceId) -> Result<Option<String>>;

    /// Peer behind a site URL, if known.
    async fn resolve_site_url(&self, url: &str) -> Result<Option<PeerId>>;

    /// Remember that `peer` proved control of `accounts`.
    async fn record_peer_auth(&self, peer: &PeerId, accounts: &[AccountId]) -> Result<()>;
}

/// Role carried by a capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Can write to (and therefore read) the space.
    Writer,
    /// Full control over the space. Private content still needs a writer
    /// capability.
    Owner,
    /// Can comment only; does not unlock private content.
    Commenter,
}

impl Role {
    /// Whether this role unlocks private content of the issuing space.
    pub fn grants_read(&self) -> bool {
        matches!(self, Role::Writer)
    }
}

/// A delegation from a space to an account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Capability {
    /// Index-assigned id.
    pub id: u64,
    /// Space granting access.
    pub issuer: SpaceId,
    /// Account receiving access.
    pub delegate: AccountId,
    /// Granted role.
    pub role: Role,
    /// Whether the capability was revoked.
    pub revoked: bool,
}

/// In-memory [`SpaceAuthority`].
#[derive(Debug, Default)]
pub struct CapabilityIndex {
    inner: RwLock<CapabilityIndexInner>,
}

#[derive(Debug, Default)]
struct CapabilityIndexInner {
    next_id: u64,

    /// All capabilities by id.
    capabilities: HashMap<u64, Capability>,

    /// Index: delegate -> capability ids.
    by_delegate: HashMap<AccountId, Vec<u64>>,

    /// Accounts each peer authenticated as.
    peer_accounts: HashMap<PeerId, BTreeSet<AccountId>>,

    /// Space -> site URL.
    site_urls: HashMap<SpaceId, String>,

    /// Site URL -> serving peer.
    site_peers: HashMap<String, PeerId>,
}

impl CapabilityIndex {
    /// Create an empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a capability. Returns its id.
    pub fn grant(&self, issuer: SpaceId, delegate: AccountId, role: Role) -> Result<u64> {
        let mut inner = self.write()?;
        let id = inner.next_id;
        inner.next_id += 1;
        inner.by_delegate.entry(delegate.clone()).or_default().push(id);
        inner.capabilities.insert(
            id,
            Capability {
                id,
                issuer,
                delegate,
                role,
                revoked: false,
            },
        );
        Ok(id)
    }

    /// Revoke a capability.
    pub fn revoke(&self, id: u64) -> Result<()> {
        let mut inner = self.write()?;
        let cap = inner
            .capabilities
            .get_mut(&id)
            .ok_or(PermsError::CapabilityNotFound(id))?;
        cap.revoked = true;
        Ok(())
    }

    /// Declare that `space` is served from `url` by `peer`.
    pub fn register_site(&self, space: SpaceId, url: impl Into<String>, peer: PeerId) -> Result<()> {
        let url = url.into();
        let mut inner = self.write()?;
        inner.site_urls.insert(space, url.clone());
        inner.site_peers.insert(url, peer);
        Ok(())
    }

    /// Accounts a peer has authenticated as.
    pub fn peer_accounts(&self, peer: &PeerId) -> Result<Vec<AccountId>> {
        Ok(self
            .read()?
            .peer_accounts
            .get(peer)
            .map(|accounts| accounts.iter().cloned().collect())
            .unwrap_or_default())
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, CapabilityIndexInner>> {
        self.inner
            .read()
            .map_err(|e| PermsError::LockPoisoned(e.to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, CapabilityIndexInner>> {
        self.inner
            .write()
            .map_err(|e| PermsError::LockPoisoned(e.to_string()))
    }
}

impl CapabilityIndexInner {
    fn spaces_for(&self, accounts: &[AccountId]) -> BTreeSet<SpaceId> {
        let mut spaces: BTreeSet<SpaceId> = accounts.iter().map(SpaceId::from).collect();
        for account in accounts {
            let Some(ids) = self.by_delegate.get(account) else {
                continue;
            };
            spaces.extend(
                ids.iter()
                    .filter_map(|id| self.capabilities.get(id))
                    .filter(|cap| !cap.revoked && cap.role.grants_read())
                    .map(|cap| cap.issuer.clone()),
            );
        }
        spaces
    }
}

#[async_trait]
impl SpaceAuthority for CapabilityIndex {
    async fn authorized_spaces(&self, accounts: &[AccountId]) -> Result<Vec<SpaceId>> {
        Ok(self.read()?.spaces_for(accounts).into_iter().collect())
    }

    async fn authorized_spaces_for_peer(
        &self,
        peer: &PeerId,
        requested: &[Iri],
    ) -> Result<Vec<SpaceId>> {
        let inner = self.read()?;
        let accounts: Vec<AccountId> = inner
            .peer_accounts
            .get(peer)
            .map(|a| a.iter().cloned().collect())
            .unwrap_or_default();
        let mut spaces = inner.spaces_for(&accounts);

        // Site servers may read the spaces they host.
        for iri in requested {
            let space = iri.space();
            let hosted = inner
                .site_urls
                .get(&space)
                .and_then(|url| inner.site_peers.get(url))
                .is_some_and(|host| host == peer);
            if hosted {
                spaces.insert(space);
            }
        }

        Ok(spaces.into_iter().collect())
    }

    async fn site_url(&self, space: &SpaceId) -> Result<Option<String>> {
        Ok(self.read()?.site_urls.get(space).cloned())
    }

    async fn resolve_site_url(&self, url: &str) -> Result<Option<PeerId>> {
        Ok(self.read()?.site_peers.get(url).cloned())
    }

    async fn record_peer_auth(&self, peer: &PeerId, accounts: &[AccountId]) -> Result<()> {
        let mut inner = self.write()?;
        inner
            .peer_accounts
            .entry(peer.clone())
            .or_default()
            .extend(accounts.iter().cloned());
        tracing::debug!(peer = %peer, accounts = accounts.len(), "peer authenticated");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn acc(s: &str) -> AccountId {
        AccountId::new(s)
    }

    fn space(s: &str) -> SpaceId {
        SpaceId::new(s)
    }

    #[tokio::test]
    async fn test_accounts_see_own_space() {
        let index = CapabilityIndex::new();
        let spaces = index.authorized_spaces(&[acc("alice")]).await.unwrap();
        assert_eq!(spaces, vec![space("alice")]);
    }

    #[tokio::test]
    async fn test_writer_capability_grants_space() {
        let index = CapabilityIndex::new();
        index.grant(space("team"), acc("alice"), Role::Writer).unwrap();
        index.grant(space("blog"), acc("alice"), Role::Commenter).unwrap();

        let spaces = index.authorized_spaces(&[acc("alice")]).await.unwrap();
        assert_eq!(spaces, vec![space("alice"), space("team")]);
    }

    #[tokio::test]
    async fn test_only_writer_unlocks_private_content() {
        let index = CapabilityIndex::new();
        index.grant(space("team"), acc("alice"), Role::Owner).unwrap();
        index.grant(space("blog"), acc("alice"), Role::Writer).unwrap();

        let spaces = index.authorized_spaces(&[acc("alice")]).await.unwrap();
        assert_eq!(spaces, vec![space("alice"), space("blog")]);
        assert!(!Role::Owner.grants_read());
    }

    #[tokio::test]
    async fn test_revoked_capability_is_ignored() {
        let index = CapabilityIndex::new();
        let id = index.grant(space("team"), acc("alice"), Role::Writer).unwrap();
        index.revoke(id).unwrap();

        let spaces = index.authorized_spaces(&[acc("alice")]).await.unwrap();
        assert_eq!(spaces, vec![space("alice")]);
        assert!(matches!(
            index.revoke(999),
            Err(PermsError::CapabilityNotFound(999))
        ));
    }

    #[tokio::test]
    async fn test_peer_spaces_follow_authentication() {
        let index = CapabilityIndex::new();
        let peer = PeerId::new("peer-1");
        index.grant(space("team"), acc("bob"), Role::Writer).unwrap();

        let none = index.authorized_spaces_for_peer(&peer, &[]).await.unwrap();
        assert!(none.is_empty());

        index.record_peer_auth(&peer, &[acc("bob")]).await.unwrap();
        let spaces = index.authorized_spaces_for_peer(&peer, &[]).await.unwrap();
        assert_eq!(spaces, vec![space("bob"), space("team")]);
        assert_eq!(index.peer_accounts(&peer).unwrap(), vec![acc("bob")]);
    }

    #[tokio::test]
    async fn test_site_server_reads_hosted_space() {
        let index = CapabilityIndex::new();
        let site = PeerId::new("site-peer");
        index
            .register_site(space("alice"), "https://alice.example", site.clone())
            .unwrap();

        let wanted = [Iri::parse("hm://alice/docs").unwrap()];
        let spaces = index.authorized_spaces_for_peer(&site, &wanted).await.unwrap();
        assert_eq!(spaces, vec![space("alice")]);

        let stranger = PeerId::new("stranger");
        let spaces = index
            .authorized_spaces_for_peer(&stranger, &wanted)
            .await
            .unwrap();
        assert!(spaces.is_empty());

        assert_eq!(
            index.site_url(&space("alice")).await.unwrap().as_deref(),
            Some("https://alice.example")
        );
        assert_eq!(
            index.resolve_site_url("https://alice.example").await.unwrap(),
            Some(site)
        );
    }
}
