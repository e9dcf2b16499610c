//! Repository facade. Ties the store, the type model, the index and the
//! authorization oracle into the caller-facing operation set. Every operation
//! checks the oracle before touching the store; searches get their
//! authorization filter from the query compiler instead.

pub mod authz;
pub mod content;

pub use authz::{AclOracle, AuthorizationOracle, Decision};
pub use content::{ContentStore, MemoryContentStore};

use chrono::Utc;
use parking_lot::RwLock;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{info, warn};

use crate::acl::Privilege;
use crate::config::RepositoryConfig;
use crate::error::{RepoError, RepoResult};
use crate::index::{IndexEngine, IndexSynchronizer, SearchResults};
use crate::path::Uri;
use crate::principal::{Principal, PrincipalResolver, StaticPrincipalResolver};
use crate::query::{compile_search, CompileCtx, Search};
use crate::resource::{PropertySet, Resource, Value, NULL_RESOURCE_ID};
use crate::store::{snapshot, AclUpdate, ResourceStore};
use crate::types::{
    model, EvalContext, LifecycleEvent, PropertyEvaluator, TypeRegistry, PROP_OWNER,
};

pub struct Repository {
    store: ResourceStore,
    registry: Arc<TypeRegistry>,
    resolver: Arc<dyn PrincipalResolver>,
    oracle: Arc<dyn AuthorizationOracle>,
    content: Arc<dyn ContentStore>,
    engine: Arc<RwLock<IndexEngine>>,
    synchronizer: IndexSynchronizer,
    config: Option<RepositoryConfig>,
}

/// Assembles a [`Repository`]; every part not supplied falls back to the
/// in-memory default (fresh store, builtin model, static resolver, memory
/// content store, ACL oracle).
#[derive(Default)]
pub struct RepositoryBuilder {
    store: Option<ResourceStore>,
    registry: Option<TypeRegistry>,
    resolver: Option<Arc<dyn PrincipalResolver>>,
    content: Option<Arc<dyn ContentStore>>,
    oracle: Option<Arc<dyn AuthorizationOracle>>,
    config: Option<RepositoryConfig>,
}

impl RepositoryBuilder {
    pub fn new() -> Self { Self::default() }

    pub fn with_store(mut self, store: ResourceStore) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_registry(mut self, registry: TypeRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn with_resolver(mut self, resolver: impl PrincipalResolver + 'static) -> Self {
        self.resolver = Some(Arc::new(resolver));
        self
    }

    pub fn with_content_store(mut self, content: impl ContentStore + 'static) -> Self {
        self.content = Some(Arc::new(content));
        self
    }

    pub fn with_oracle(mut self, oracle: impl AuthorizationOracle + 'static) -> Self {
        self.oracle = Some(Arc::new(oracle));
        self
    }

    /// Tie the repository to a data directory: the store loads from its
    /// snapshot when one exists, and periodic snapshotting starts when the
    /// settings enable it.
    pub fn with_config(mut self, config: RepositoryConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn build(self) -> Repository {
        let store = match self.store {
            Some(store) => store,
            None => match &self.config {
                Some(config) => store_from_snapshot(config),
                None => ResourceStore::new(),
            },
        };
        let registry = Arc::new(self.registry.unwrap_or_else(|| model::builtin().clone()));
        let resolver = self
            .resolver
            .unwrap_or_else(|| Arc::new(StaticPrincipalResolver::new()));
        let content: Arc<dyn ContentStore> = self
            .content
            .unwrap_or_else(|| Arc::new(MemoryContentStore::new()));
        let oracle: Arc<dyn AuthorizationOracle> = self
            .oracle
            .unwrap_or_else(|| Arc::new(AclOracle::new(store.clone(), resolver.clone())));
        let engine = Arc::new(RwLock::new(IndexEngine::new()));
        let synchronizer = IndexSynchronizer::new(store.clone(), engine.clone());
        if let Some(config) = &self.config {
            if config.snapshot.enabled {
                spawn_snapshot_loop(store.clone(), config);
            }
        }
        Repository { store, registry, resolver, oracle, content, engine, synchronizer, config: self.config }
    }
}

fn store_from_snapshot(config: &RepositoryConfig) -> ResourceStore {
    let path = config.snapshot_path();
    if path.exists() {
        match snapshot::load(&path) {
            Ok(store) => return store,
            Err(err) => {
                warn!(target: "depot::repository", path = %path.display(), error = %err, "snapshot load failed, starting empty");
            }
        }
    }
    ResourceStore::new()
}

/// Detached snapshot writer in the configured interval. The thread holds its
/// own store handle and runs for the life of the process.
fn spawn_snapshot_loop(store: ResourceStore, config: &RepositoryConfig) {
    let path = config.snapshot_path();
    let interval = std::time::Duration::from_millis(config.snapshot.interval_ms.max(1));
    std::thread::spawn(move || loop {
        std::thread::sleep(interval);
        if let Err(err) = snapshot::save(&store, &path) {
            warn!(target: "depot::repository", error = %err, "periodic snapshot failed");
        }
    });
}

impl Repository {
    /// All-defaults repository: empty store, builtin model, no known users.
    pub fn new() -> Self { RepositoryBuilder::new().build() }

    /// Repository bound to a data directory's settings.
    pub fn open(config: RepositoryConfig) -> Self {
        RepositoryBuilder::new().with_config(config).build()
    }

    pub fn builder() -> RepositoryBuilder { RepositoryBuilder::new() }

    pub fn store(&self) -> &ResourceStore { &self.store }

    pub fn registry(&self) -> &TypeRegistry { &self.registry }

    /// Write the store snapshot now. Requires a configured data directory.
    pub fn save_snapshot(&self) -> anyhow::Result<()> {
        let Some(config) = &self.config else {
            anyhow::bail!("repository has no data directory configured");
        };
        snapshot::save(&self.store, &config.snapshot_path())
    }

    pub fn retrieve(&self, principal: Option<&Principal>, uri: &Uri) -> RepoResult<Resource> {
        self.authorize(principal, Privilege::Read, uri)?;
        self.store.load(uri)
    }

    pub fn retrieve_content(&self, principal: Option<&Principal>, uri: &Uri) -> RepoResult<Vec<u8>> {
        self.authorize(principal, Privilege::Read, uri)?;
        let resource = self.store.load(uri)?;
        if resource.is_collection {
            return Err(RepoError::constraint("collection_has_no_content", format!("{uri} is a collection")));
        }
        self.content.read(resource.id)
    }

    /// Immediate children of a collection, in URI order.
    pub fn children(&self, principal: Option<&Principal>, uri: &Uri) -> RepoResult<Vec<Resource>> {
        self.authorize(principal, Privilege::Read, uri)?;
        self.store.children(uri)
    }

    pub fn create_document(
        &self,
        principal: &Principal,
        uri: &Uri,
        content: &[u8],
        content_type_hint: Option<&str>,
        props: &PropertySet,
    ) -> RepoResult<Resource> {
        self.create(principal, uri, false, Some(content), content_type_hint, props)
    }

    pub fn create_collection(
        &self,
        principal: &Principal,
        uri: &Uri,
        props: &PropertySet,
    ) -> RepoResult<Resource> {
        self.create(principal, uri, true, None, None, props)
    }

    /// Replace the client-editable properties. The full proposed property set
    /// goes through the properties-change evaluation flow; the row-level
    /// owner follows the evaluated owner property.
    pub fn store_properties(
        &self,
        principal: &Principal,
        uri: &Uri,
        props: &PropertySet,
    ) -> RepoResult<Resource> {
        self.authorize(Some(principal), Privilege::Write, uri)?;
        let previous = self.store.load(uri)?;
        let now = Utc::now();
        let ctx = EvalContext {
            event: LifecycleEvent::PropertiesChange,
            principal,
            now,
            uri,
            is_collection: previous.is_collection,
            is_admin: self.allows(Some(principal), Privilege::Admin, uri),
            content: None,
            content_type_hint: None,
        };
        let evaluated =
            PropertyEvaluator::new(&self.registry).evaluate_props_change(&ctx, &previous, props)?;
        let mut updated = previous;
        updated.resource_type = evaluated.resource_type;
        updated.props = evaluated.props;
        if let Some(owner) = owner_name(&updated.props) {
            updated.owner = owner;
        }
        updated.properties_modified_by = principal.name.clone();
        updated.properties_modified_at = now;
        updated.modified_by = principal.name.clone();
        updated.modified_at = now;
        self.store.store(&updated)
    }

    /// Replace a document body. The content-change evaluation flow reruns the
    /// content evaluators and may migrate the resource type.
    pub fn store_content(
        &self,
        principal: &Principal,
        uri: &Uri,
        content: &[u8],
        content_type_hint: Option<&str>,
    ) -> RepoResult<Resource> {
        self.authorize(Some(principal), Privilege::Write, uri)?;
        let previous = self.store.load(uri)?;
        if previous.is_collection {
            return Err(RepoError::constraint("collection_has_no_content", format!("{uri} is a collection")));
        }
        let now = Utc::now();
        let ctx = EvalContext {
            event: LifecycleEvent::ContentChange,
            principal,
            now,
            uri,
            is_collection: false,
            is_admin: self.allows(Some(principal), Privilege::Admin, uri),
            content: Some(content),
            content_type_hint,
        };
        let evaluated =
            PropertyEvaluator::new(&self.registry).evaluate_content_change(&ctx, &previous)?;
        let mut updated = previous;
        updated.resource_type = evaluated.resource_type;
        updated.props = evaluated.props;
        updated.content_modified_by = principal.name.clone();
        updated.content_modified_at = now;
        updated.modified_by = principal.name.clone();
        updated.modified_at = now;
        let stored = self.store.store(&updated)?;
        self.content.write(stored.id, content)?;
        Ok(stored)
    }

    /// ACL administration requires the admin privilege on the resource.
    pub fn store_acl(&self, principal: &Principal, uri: &Uri, update: AclUpdate) -> RepoResult<Resource> {
        self.authorize(Some(principal), Privilege::Admin, uri)?;
        self.store.store_acl(uri, update)
    }

    pub fn copy(
        &self,
        principal: &Principal,
        src: &Uri,
        dest: &Uri,
        preserve_acl: bool,
    ) -> RepoResult<Resource> {
        self.authorize(Some(principal), Privilege::Read, src)?;
        let dest_parent = dest
            .parent()
            .ok_or_else(|| RepoError::constraint("destination_is_root", "the root collection cannot be a destination"))?;
        self.authorize(Some(principal), Privilege::Write, &dest_parent)?;
        let sources = self.store.subtree_index(src);
        let copied = self.store.copy(src, dest, &principal.name, Utc::now(), preserve_acl)?;
        for (old_id, old_uri, is_collection) in sources {
            if is_collection {
                continue;
            }
            let new_uri = rebase(&old_uri, src.as_str(), dest.as_str());
            if let Some(new_id) = Uri::parse(&new_uri).ok().and_then(|u| self.store.resource_id(&u)) {
                self.content.copy(old_id, new_id)?;
            }
        }
        info!(target: "depot::repository", src = %src, dest = %dest, by = %principal.name, "copied");
        Ok(copied)
    }

    pub fn move_resource(&self, principal: &Principal, src: &Uri, dest: &Uri) -> RepoResult<Resource> {
        let src_parent = src
            .parent()
            .ok_or_else(|| RepoError::constraint("root_immovable", "the root collection cannot be moved"))?;
        self.authorize(Some(principal), Privilege::Write, &src_parent)?;
        let dest_parent = dest
            .parent()
            .ok_or_else(|| RepoError::constraint("destination_is_root", "the root collection cannot be a destination"))?;
        self.authorize(Some(principal), Privilege::Write, &dest_parent)?;
        let moved = self.store.move_resource(src, dest)?;
        info!(target: "depot::repository", src = %src, dest = %dest, by = %principal.name, "moved");
        Ok(moved)
    }

    pub fn delete(&self, principal: &Principal, uri: &Uri) -> RepoResult<()> {
        let parent = uri
            .parent()
            .ok_or_else(|| RepoError::constraint("root_undeletable", "the root collection cannot be deleted"))?;
        self.authorize(Some(principal), Privilege::Write, &parent)?;
        let subtree = self.store.subtree_index(uri);
        self.store.delete(uri)?;
        for (id, _, is_collection) in subtree {
            if !is_collection {
                self.content.remove(id)?;
            }
        }
        info!(target: "depot::repository", uri = %uri, by = %principal.name, "deleted");
        Ok(())
    }

    /// Compile and run a search against the index. The compiled query always
    /// carries the caller's authorization filter; only the system principal
    /// searches unfiltered.
    pub fn search(&self, principal: Option<&Principal>, search: &Search) -> RepoResult<SearchResults> {
        let groups: BTreeSet<String> = principal
            .map(|p| self.resolver.member_groups(p))
            .unwrap_or_default();
        let engine = self.engine.read();
        let ctx = CompileCtx { registry: &self.registry, lookup: &*engine };
        let compiled = compile_search(search, principal, &groups, &ctx)?;
        Ok(engine.search(&compiled))
    }

    /// Wipe and re-scan the index, whole tree or one subtree.
    pub fn rebuild_index(&self, scope: Option<&Uri>) -> RepoResult<usize> {
        self.synchronizer.rebuild(scope)
    }

    /// Drain the change log and apply it to the index incrementally.
    pub fn sync_index(&self) -> RepoResult<usize> {
        self.synchronizer.sync()
    }

    fn create(
        &self,
        principal: &Principal,
        uri: &Uri,
        is_collection: bool,
        content: Option<&[u8]>,
        content_type_hint: Option<&str>,
        props: &PropertySet,
    ) -> RepoResult<Resource> {
        let parent = uri
            .parent()
            .ok_or_else(|| RepoError::constraint("root_exists", "the root collection always exists"))?;
        self.authorize(Some(principal), Privilege::Write, &parent)?;
        let now = Utc::now();
        let ctx = EvalContext {
            event: LifecycleEvent::Create,
            principal,
            now,
            uri,
            is_collection,
            is_admin: self.allows(Some(principal), Privilege::Admin, &parent),
            content,
            content_type_hint,
        };
        let evaluated = PropertyEvaluator::new(&self.registry).evaluate_create(&ctx, props)?;
        let resource = Resource {
            id: NULL_RESOURCE_ID,
            uri: uri.clone(),
            is_collection,
            resource_type: evaluated.resource_type,
            owner: principal.name.clone(),
            created_by: principal.name.clone(),
            created_at: now,
            content_modified_by: principal.name.clone(),
            content_modified_at: now,
            properties_modified_by: principal.name.clone(),
            properties_modified_at: now,
            modified_by: principal.name.clone(),
            modified_at: now,
            acl_inherited_from: None,
            props: evaluated.props,
        };
        let stored = self.store.create(&resource)?;
        if let Some(body) = content {
            self.content.write(stored.id, body)?;
        }
        info!(target: "depot::repository", uri = %uri, id = stored.id, by = %principal.name, "created");
        Ok(stored)
    }

    fn authorize(&self, principal: Option<&Principal>, required: Privilege, uri: &Uri) -> RepoResult<()> {
        let decision = self.oracle.decide(principal, required, uri)?;
        if decision.allow {
            return Ok(());
        }
        Err(RepoError::auth(
            "forbidden",
            format!(
                "{} on {} denied for {}",
                required.as_str(),
                uri,
                principal.map(|p| p.name.as_str()).unwrap_or("anonymous")
            ),
        ))
    }

    fn allows(&self, principal: Option<&Principal>, required: Privilege, uri: &Uri) -> bool {
        self.oracle
            .decide(principal, required, uri)
            .map(|d| d.allow)
            .unwrap_or(false)
    }
}

impl Default for Repository {
    fn default() -> Self { Self::new() }
}

/// Owner taken from the evaluated property set; the row field mirrors it so
/// an admin edit of the owner property takes effect.
fn owner_name(props: &PropertySet) -> Option<String> {
    let value = props.get_default(PROP_OWNER)?.value.first()?;
    match value {
        Value::Principal(p) => Some(p.name.clone()),
        Value::String(s) => Some(s.clone()),
        _ => None,
    }
}

fn rebase(uri: &str, from: &str, to: &str) -> String {
    if uri == from {
        to.to_string()
    } else {
        format!("{to}{}", &uri[from.len()..])
    }
}
