//! The type registry.
//!
//! Node storage is an append-only arena behind one reader/writer lock.
//! The write lock is held only while a node is inserted; lookups take the
//! read lock just long enough to clone the node's `Arc`. Class descriptor
//! construction is serialized separately by a re-entrant mutex, see
//! [`class`](crate::class).

use std::mem;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use once_cell::sync::{Lazy, OnceCell};
use parking_lot::{Mutex, ReentrantMutex, RwLock};
use rustc_hash::FxHashMap;
use sysobj_gc::{mem as gc_mem, Collector, Strategy};

use super::info::TypeInfo;
use super::node::{ClassData, InterfaceData, NodeData, TypeNode};
use super::{NodeKind, TypeId};
use crate::config::RuntimeOptions;
use crate::defaults::PRIVATE_ALIGN;
use crate::error::{RegistryError, RegistryResult};
use crate::instance::InstanceHeader;
use crate::interface::{self, InterfaceEntry, TypeInterface};
use crate::object;

static GLOBAL: Lazy<TypeRegistry> = Lazy::new(|| {
    let options = RuntimeOptions::from_env().unwrap_or_else(|e| {
        tracing::warn!(target: "sysobj::types", "{e}, using default options");
        RuntimeOptions::default()
    });
    let options = match gc_mem::install(options.strategy) {
        Ok(()) => options,
        Err(e) => {
            tracing::warn!(target: "sysobj::types", "{e}");
            options.with_strategy(gc_mem::active())
        }
    };
    TypeRegistry::with_options(options)
});

const FUNDAMENTAL_SLOTS: usize = 256;

pub(crate) struct TypeTables {
    nodes: Vec<Arc<TypeNode>>,
    /// Fundamental tag -> arena slot
    fundamentals: Vec<Option<usize>>,
    names: FxHashMap<Arc<str>, TypeId>,
}

impl TypeTables {
    fn get(&self, ty: TypeId) -> Option<&Arc<TypeNode>> {
        let slot = match ty.fundamental_tag() {
            Some(tag) => (*self.fundamentals.get(tag)?)?,
            None => ty.slot()?,
        };
        self.nodes.get(slot).filter(|node| node.id == ty)
    }
}

pub(crate) struct RegistryInner {
    pub(crate) tables: RwLock<TypeTables>,
    pub(crate) class_lock: ReentrantMutex<()>,
    /// Every interface entry, for teardown
    pub(crate) interfaces: Mutex<Vec<Arc<InterfaceEntry>>>,
    pub(crate) options: RuntimeOptions,
    pub(crate) torn_down: AtomicBool,
}

/// What a registry teardown released or found still in use
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TeardownReport {
    /// Interface entries dropped
    pub interface_entries: usize,
    /// Class references held on behalf of interfaces and released
    pub pinned_classes: usize,
    /// Classes still referenced by live instances, with their counts
    pub leaked_classes: Vec<(String, usize)>,
}

/// Registry of fundamental types, classes and interfaces
///
/// Cheap to clone; clones share the same tables. A process-wide instance
/// is available through [`TypeRegistry::global`]; private registries are
/// useful for embedding and tests.
#[derive(Clone)]
pub struct TypeRegistry {
    pub(crate) inner: Arc<RegistryInner>,
}

impl TypeRegistry {
    /// A registry with default options and the fundamental types registered.
    pub fn new() -> Self {
        Self::with_options(RuntimeOptions::default())
    }

    /// A registry with the given options and the fundamental types registered.
    ///
    /// Under mark-sweep the options' leak report limit is applied to the
    /// global collector its instances are allocated from.
    pub fn with_options(options: RuntimeOptions) -> Self {
        if options.strategy == Strategy::MarkSweep {
            Collector::global().set_leak_report_limit(options.leak_report_limit);
        }
        let registry = Self {
            inner: Arc::new(RegistryInner {
                tables: RwLock::new(TypeTables {
                    nodes: Vec::new(),
                    fundamentals: vec![None; FUNDAMENTAL_SLOTS],
                    names: FxHashMap::default(),
                }),
                class_lock: ReentrantMutex::new(()),
                interfaces: Mutex::new(Vec::new()),
                options,
                torn_down: AtomicBool::new(false),
            }),
        };
        registry.register_builtins();
        registry
    }

    /// The process-wide registry, configured from the environment.
    ///
    /// Its strategy is installed as the process-wide strategy table.
    pub fn global() -> &'static TypeRegistry {
        &GLOBAL
    }

    pub(crate) fn from_inner(inner: Arc<RegistryInner>) -> Self {
        Self { inner }
    }

    pub(crate) fn downgrade(&self) -> Weak<RegistryInner> {
        Arc::downgrade(&self.inner)
    }

    pub fn options(&self) -> &RuntimeOptions {
        &self.inner.options
    }

    pub fn strategy(&self) -> Strategy {
        self.inner.options.strategy
    }

    pub(crate) fn trap(&self) -> bool {
        self.inner.options.trap_contract_violations
    }

    pub fn is_torn_down(&self) -> bool {
        self.inner.torn_down.load(Ordering::Acquire)
    }

    pub(crate) fn ensure_live(&self) -> RegistryResult<()> {
        if self.is_torn_down() {
            return Err(RegistryError::TornDown);
        }
        Ok(())
    }

    fn register_builtins(&self) {
        let builtins = [
            (TypeId::FUNDAMENTAL_NODE, TypeInfo::fundamental("FundamentalNode")),
            (
                TypeId::INTERFACE,
                TypeInfo::interface::<TypeInterface>("Interface")
                    .with_default_init(interface::interface_default_init),
            ),
            (TypeId::CHAR, TypeInfo::fundamental("Char")),
            (TypeId::BOOL, TypeInfo::fundamental("Bool")),
            (TypeId::INT, TypeInfo::fundamental("Int")),
            (TypeId::LONG, TypeInfo::fundamental("Long")),
            (TypeId::DOUBLE, TypeInfo::fundamental("Double")),
            (TypeId::STRING, TypeInfo::fundamental("String")),
            (TypeId::POINTER, TypeInfo::fundamental("Pointer")),
            (TypeId::OBJECT, object::object_type_info()),
        ];
        for (id, info) in builtins {
            let tag = id.fundamental_tag().unwrap_or_default() as u32;
            if let Err(e) = self.register_fundamental(tag, info) {
                tracing::error!(target: "sysobj::types", "builtin type registration failed: {e}");
            }
        }
    }

    /// Register a type deriving from `parent`.
    ///
    /// Configuration errors are logged and returned; they indicate a
    /// malformed declaration rather than a runtime condition.
    pub fn register_type(&self, parent: TypeId, info: TypeInfo) -> RegistryResult<TypeId> {
        self.ensure_live()?;
        let parent_node = self.node(parent).ok_or(RegistryError::UnknownType(parent))?;
        let result = Self::node_data(&info, Some(&parent_node))
            .and_then(|data| self.insert(None, Some(&parent_node), &info, data));
        if let Err(e) = &result {
            tracing::error!(target: "sysobj::types", "{e}");
        }
        result
    }

    /// Register a root type under a fixed fundamental tag (1..=255).
    pub fn register_fundamental(&self, tag: u32, info: TypeInfo) -> RegistryResult<TypeId> {
        self.ensure_live()?;
        if tag == 0 || tag as usize >= FUNDAMENTAL_SLOTS {
            return Err(RegistryError::InvalidFundamental { tag });
        }
        let result = Self::node_data(&info, None)
            .and_then(|data| self.insert(Some(tag), None, &info, data));
        if let Err(e) = &result {
            tracing::error!(target: "sysobj::types", "{e}");
        }
        result
    }

    fn node_data(info: &TypeInfo, parent: Option<&TypeNode>) -> RegistryResult<NodeData> {
        let invalid = |reason: &'static str| RegistryError::InvalidDeclaration {
            name: info.name.clone(),
            reason,
        };
        if info.name.is_empty() {
            return Err(invalid("type name is empty"));
        }
        if let Some(parent) = parent {
            let compatible = match info.kind {
                NodeKind::Fundamental => false,
                NodeKind::Interface => parent.kind.is_interface(),
                NodeKind::BaseClass | NodeKind::AbstractClass => parent.kind.is_class(),
            };
            if !compatible {
                return Err(RegistryError::WrongParentKind {
                    name: info.name.clone(),
                    parent: parent.name().to_string(),
                });
            }
        }

        match info.kind {
            NodeKind::Fundamental => Ok(NodeData::Fundamental),
            NodeKind::BaseClass | NodeKind::AbstractClass => {
                let Some(class_new) = info.class_new.filter(|_| info.class_size > 0) else {
                    return Err(invalid("class size must be positive"));
                };
                let Some(class_init) = info.class_init else {
                    return Err(invalid("class-init hook is required"));
                };
                if info.instance_size < mem::size_of::<InstanceHeader>() {
                    return Err(invalid("instance is smaller than the instance header"));
                }
                if let Some(parent) = parent {
                    if info.instance_size < parent.instance_size() {
                        return Err(invalid("instance is smaller than its parent's"));
                    }
                    if info.class_size < parent.class_size() {
                        return Err(invalid("class struct is smaller than its parent's"));
                    }
                }
                Ok(NodeData::Class(ClassData {
                    class_size: info.class_size,
                    instance_size: info.instance_size,
                    own_private_size: info.private_size.next_multiple_of(PRIVATE_ALIGN),
                    private_size: OnceCell::new(),
                    class_new,
                    class_init,
                    class_finalize: info.class_finalize,
                    instance_init: info.instance_init,
                    class: Mutex::new(None),
                    building: AtomicBool::new(false),
                    pinned: AtomicBool::new(false),
                    props: Mutex::new(Vec::new()),
                }))
            }
            NodeKind::Interface => {
                let Some(vtable_new) = info
                    .class_new
                    .filter(|_| info.class_size >= mem::size_of::<TypeInterface>())
                else {
                    return Err(invalid("vtable is smaller than the interface header"));
                };
                let Some(default_init) = info.default_init else {
                    return Err(invalid("interface init hook is required"));
                };
                Ok(NodeData::Interface(InterfaceData {
                    vtable_size: info.class_size,
                    vtable_new,
                    default_init,
                }))
            }
        }
    }

    fn insert(
        &self,
        tag: Option<u32>,
        parent: Option<&TypeNode>,
        info: &TypeInfo,
        data: NodeData,
    ) -> RegistryResult<TypeId> {
        let mut tables = self.inner.tables.write();
        if tables.names.contains_key(info.name.as_str()) {
            return Err(RegistryError::DuplicateName {
                name: info.name.clone(),
            });
        }

        let slot = tables.nodes.len();
        let id = match tag {
            Some(tag) => {
                let entry = &mut tables.fundamentals[tag as usize];
                if entry.is_some() {
                    return Err(RegistryError::InvalidFundamental { tag });
                }
                *entry = Some(slot);
                TypeId::fundamental(tag)
            }
            None => TypeId::from_slot(slot),
        };

        let mut supers = Vec::with_capacity(parent.map_or(1, |p| p.supers.len() + 1));
        supers.push(id);
        if let Some(parent) = parent {
            supers.extend_from_slice(&parent.supers);
        }

        let name: Arc<str> = Arc::from(info.name.as_str());
        tables.nodes.push(Arc::new(TypeNode {
            id,
            name: Arc::clone(&name),
            kind: info.kind,
            supers: supers.into_boxed_slice(),
            ref_count: AtomicUsize::new(0),
            data,
        }));
        tables.names.insert(name, id);

        tracing::debug!(
            target: "sysobj::types",
            name = %info.name,
            %id,
            kind = ?info.kind,
            "type registered"
        );
        Ok(id)
    }

    pub fn node(&self, ty: TypeId) -> Option<Arc<TypeNode>> {
        self.inner.tables.read().get(ty).cloned()
    }

    pub(crate) fn class_node(&self, ty: TypeId) -> RegistryResult<Arc<TypeNode>> {
        let node = self.node(ty).ok_or(RegistryError::UnknownType(ty))?;
        if !node.kind.is_class() {
            return Err(RegistryError::NotAClass {
                name: node.name().to_string(),
            });
        }
        Ok(node)
    }

    pub fn get_by_name(&self, name: &str) -> Option<TypeId> {
        self.inner.tables.read().names.get(name).copied()
    }

    pub fn type_name(&self, ty: TypeId) -> Option<Arc<str>> {
        self.inner
            .tables
            .read()
            .get(ty)
            .map(|node| Arc::clone(&node.name))
    }

    /// Whether `ancestor` is `child` itself or one of its ancestors.
    pub fn type_is_a(&self, child: TypeId, ancestor: TypeId) -> bool {
        let tables = self.inner.tables.read();
        match (tables.get(child), tables.get(ancestor)) {
            (Some(child), Some(ancestor)) => child.is_a(ancestor),
            _ => false,
        }
    }

    pub fn parent(&self, ty: TypeId) -> Option<TypeId> {
        self.node(ty)?.parent()
    }

    /// Number of ancestors above `ty`.
    pub fn depth(&self, ty: TypeId) -> Option<usize> {
        Some(self.node(ty)?.n_supers())
    }

    pub fn kind(&self, ty: TypeId) -> Option<NodeKind> {
        Some(self.node(ty)?.kind)
    }

    pub fn is_class(&self, ty: TypeId) -> bool {
        self.kind(ty).is_some_and(NodeKind::is_class)
    }

    pub fn is_interface(&self, ty: TypeId) -> bool {
        self.kind(ty).is_some_and(NodeKind::is_interface)
    }

    pub fn is_abstract(&self, ty: TypeId) -> bool {
        self.kind(ty) == Some(NodeKind::AbstractClass)
    }

    pub fn type_count(&self) -> usize {
        self.inner.tables.read().nodes.len()
    }

    pub fn instance_size(&self, ty: TypeId) -> Option<usize> {
        let node = self.node(ty)?;
        Some(node.class_data()?.instance_size)
    }

    /// Private data of `ty` and all its ancestors, in bytes.
    pub fn private_size(&self, ty: TypeId) -> Option<usize> {
        let node = self.node(ty)?;
        node.class_data()?;
        Some(self.ensure_private_size(&node))
    }

    /// Offset of `ty`'s own private data relative to an instance pointer.
    ///
    /// Always negative or zero, and never larger than the parent's offset,
    /// so it stays valid for instances of every subclass.
    pub fn private_offset(&self, ty: TypeId) -> Option<isize> {
        self.private_size(ty).map(|size| -(size as isize))
    }

    /// Fix the accumulated private size of a class the first time it is needed.
    pub(crate) fn ensure_private_size(&self, node: &TypeNode) -> usize {
        let Some(data) = node.class_data() else {
            return 0;
        };
        *data.private_size.get_or_init(|| {
            let inherited = node
                .parent()
                .and_then(|parent| self.node(parent))
                .map_or(0, |parent| self.ensure_private_size(&parent));
            inherited + data.own_private_size
        })
    }

    /// Release every class and interface entry.
    ///
    /// Runs at most once; later calls log a warning and do nothing, and
    /// registration fails afterwards. Classes still referenced by live
    /// instances are reported and force-finalized.
    pub fn teardown(&self) -> TeardownReport {
        let mut report = TeardownReport::default();
        if self.is_torn_down() {
            tracing::warn!(target: "sysobj::types", "type registry already torn down");
            return report;
        }
        let nodes: Vec<Arc<TypeNode>> = self.inner.tables.read().nodes.clone();
        report.interface_entries = mem::take(&mut *self.inner.interfaces.lock()).len();

        // Leaf classes were registered last; unpin them first so their
        // parents can drop to zero in the same pass.
        for node in nodes.iter().rev() {
            let Some(data) = node.class_data() else {
                continue;
            };
            if data.pinned.swap(false, Ordering::AcqRel) {
                if let Some(class) = self.class_peek(node.id) {
                    self.class_unref(&class);
                    report.pinned_classes += 1;
                }
            }
        }
        self.inner.torn_down.store(true, Ordering::Release);

        let _guard = self.inner.class_lock.lock();
        for node in nodes.iter().rev() {
            let Some(data) = node.class_data() else {
                continue;
            };
            let Some(class) = data.class.lock().take() else {
                continue;
            };
            let count = node.ref_count.swap(0, Ordering::AcqRel);
            tracing::warn!(
                target: "sysobj::types",
                "class {} still referenced {} times at teardown",
                node.name,
                count
            );
            report.leaked_classes.push((node.name.to_string(), count));
            if let Some(finalize) = data.class_finalize {
                finalize(&class);
            }
            class.clear_interfaces();
        }

        tracing::info!(
            target: "sysobj::types",
            interfaces = report.interface_entries,
            leaked = report.leaked_classes.len(),
            "type registry torn down"
        );
        report
    }
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for TypeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypeRegistry")
            .field("types", &self.type_count())
            .field("options", &self.inner.options)
            .field("torn_down", &self.is_torn_down())
            .finish()
    }
}
