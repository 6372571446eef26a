use loader::{is_runtime_symbol, ProgramImage, SymbolTable};
use types::{Callable, ObjectGraph, ObjectId, Variant};
use vm::{BackgroundTranslation, Machine, PageAttributes, SharedBuffer};

use crate::config::SandboxConfig;
use crate::counters::{CallCounters, InstanceToken};
use crate::engine::{FaultReport, SandboxCore};
use crate::error::SandboxError;
use crate::execution_context::CallStack;
use crate::guard::{ClassPredicate, MethodPredicate, ObjectGuard, ObjectPredicate, PropertyPredicate, ResourcePredicate};
use crate::scoped::{ScopedObjects, ScopedVariants};
use crate::shm::SharedMemory;
use crate::singletons::{SingletonLookup, Singletons};
use crate::translation::background_translation_enabled;

/// One guest program attached to one host object graph.
///
/// EDUCATIONAL PURPOSE: this is the host-facing side of the sandbox. The
/// host loads a RISC-V ELF, tells the sandbox which object it is running
/// for (`self_object`) and where relative node paths start (`tree_base`),
/// and then calls guest functions by name. Everything the guest does in
/// between goes through the syscall table and the object guard.
///
/// A sandbox is single threaded. Calls may nest (guest -> host -> guest)
/// up to `max_call_depth`, and configuration that would change the rules
/// under a running guest is refused with `CallInProgress`.
pub struct Sandbox<H: ObjectGraph> {
    pub(crate) machine: Machine,
    pub(crate) core: SandboxCore<H>,
    config: SandboxConfig,
    shared: SharedMemory,
    translation: Option<BackgroundTranslation>,
    loaded: bool,
    _token: InstanceToken,
}

impl<H: ObjectGraph> Sandbox<H> {
    pub fn new(host: H, config: SandboxConfig) -> Result<Self, SandboxError> {
        config.validate()?;
        let machine = Machine::new(&config.machine_options())?;
        let core = SandboxCore {
            host,
            variants: ScopedVariants::new(config.max_refs),
            objects: ScopedObjects::new(config.max_refs),
            guard: ObjectGuard::default(),
            singletons: Singletons::default(),
            calls: CallStack::new(config.max_call_depth),
            symbols: SymbolTable::default(),
            self_object: ObjectId::NULL,
            tree_base: ObjectId::NULL,
            counters: CallCounters::default(),
            max_instructions: config.max_instructions,
            fault: None,
        };
        Ok(Self {
            machine,
            core,
            shared: SharedMemory::new(config.shared_memory_base),
            config,
            translation: None,
            loaded: false,
            _token: InstanceToken::acquire(),
        })
    }

    /// Replaces the running program with the ELF in `bytes`. The machine,
    /// the permanent values and all shared ranges are reset.
    pub fn load_program(&mut self, bytes: &[u8]) -> Result<(), SandboxError> {
        if self.core.in_call() {
            return Err(SandboxError::CallInProgress("load_program"));
        }
        let image = ProgramImage::parse(bytes)?;
        let mut machine = Machine::new(&self.config.machine_options())?;
        for segment in &image.segments {
            let attr = PageAttributes::new(segment.flags.read, segment.flags.write, segment.flags.exec);
            machine.load_segment(segment.vaddr, &segment.data, segment.mem_size as usize, attr)?;
        }
        match image.address_of(&self.config.exit_symbol) {
            Some(exit) => machine.set_exit_address(exit),
            None => log::debug!("no '{}' symbol, returning to the stop stub", self.config.exit_symbol),
        }

        self.translation = None;
        if background_translation_enabled() {
            if let Some(code) = image.executable_segments().next() {
                self.translation = Some(BackgroundTranslation::spawn(code.vaddr, code.data.clone()));
            }
        }

        if let Some(sampler) = self.machine.sampler() {
            machine.enable_sampling(sampler.interval());
        }
        self.machine = machine;
        self.core.symbols = image.symbols;
        self.core.variants = ScopedVariants::new(self.config.max_refs);
        self.shared = SharedMemory::new(self.config.shared_memory_base);
        self.loaded = true;
        log::info!(
            "loaded guest program: entry 0x{:08x}, {} functions",
            image.entry,
            self.core.symbols.len()
        );

        if self.config.run_main {
            self.install_translation();
            self.core.variants.set_permanent_mode(true);
            let result = self.core.call(&mut self.machine, image.entry, &[]);
            self.core.variants.set_permanent_mode(false);
            result?;
        }
        Ok(())
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    /// Calls the guest function `name` and returns what it returned.
    pub fn vmcall(&mut self, name: &str, args: &[Variant]) -> Result<Variant, SandboxError> {
        if !self.loaded {
            return Err(SandboxError::NoProgram);
        }
        let address = self.address_of(name).ok_or_else(|| SandboxError::FunctionNotFound(name.to_string()))?;
        self.vmcall_address(address, args)
    }

    /// Calls the guest function at `address`. From inside a host callback
    /// this nests one level deeper.
    pub fn vmcall_address(&mut self, address: u32, args: &[Variant]) -> Result<Variant, SandboxError> {
        if !self.loaded {
            return Err(SandboxError::NoProgram);
        }
        if !self.core.in_call() {
            self.install_translation();
        }
        self.core.call(&mut self.machine, address, args)
    }

    fn install_translation(&mut self) {
        let ready = self.translation.as_mut().and_then(BackgroundTranslation::try_take);
        if let Some(segment) = ready {
            self.machine.install_segment(segment);
            self.translation = None;
        }
    }

    /// Blocks until the background translation of the current program is
    /// installed. Returns false when there is none.
    pub fn wait_for_translation(&mut self) -> bool {
        match self.translation.take().and_then(BackgroundTranslation::wait) {
            Some(segment) => {
                self.machine.install_segment(segment);
                true
            }
            None => self.machine.has_segment(),
        }
    }

    pub fn address_of(&self, name: &str) -> Option<u32> {
        self.core.symbols.address_of(name)
    }

    pub fn has_function(&self, name: &str) -> bool {
        self.address_of(name).is_some()
    }

    /// Names of the guest functions a host may call, runtime symbols
    /// excluded.
    pub fn functions(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .core
            .symbols
            .iter()
            .filter(|s| !is_runtime_symbol(&s.name))
            .map(|s| s.name.clone())
            .collect();
        names.sort();
        names.dedup();
        names
    }

    pub fn host(&self) -> &H {
        &self.core.host
    }

    pub fn host_mut(&mut self) -> &mut H {
        &mut self.core.host
    }

    pub fn machine(&self) -> &Machine {
        &self.machine
    }

    pub fn machine_mut(&mut self) -> &mut Machine {
        &mut self.machine
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    pub fn self_object(&self) -> ObjectId {
        self.core.self_object
    }

    /// The object this sandbox runs for. Method calls on it re-enter the
    /// guest, and it is always visible to the guest.
    pub fn set_self_object(&mut self, object: ObjectId) -> Result<(), SandboxError> {
        if self.core.in_call() {
            return Err(SandboxError::CallInProgress("set_self_object"));
        }
        self.core.objects.unpin(self.core.self_object);
        if self.core.tree_base == self.core.self_object {
            self.core.objects.pin(self.core.tree_base);
        }
        self.core.objects.pin(object);
        self.core.self_object = object;
        Ok(())
    }

    pub fn tree_base(&self) -> ObjectId {
        self.core.tree_base
    }

    /// Node that relative `get_node` paths start from.
    pub fn set_tree_base(&mut self, object: ObjectId) -> Result<(), SandboxError> {
        if self.core.in_call() {
            return Err(SandboxError::CallInProgress("set_tree_base"));
        }
        if self.core.tree_base != self.core.self_object {
            self.core.objects.unpin(self.core.tree_base);
        }
        self.core.objects.pin(object);
        self.core.tree_base = object;
        Ok(())
    }

    pub fn register_singleton(&mut self, name: &str, lookup: SingletonLookup<H>) -> Result<(), SandboxError> {
        if self.core.in_call() {
            return Err(SandboxError::CallInProgress("register_singleton"));
        }
        self.core.singletons.register(name, lookup);
        Ok(())
    }

    pub fn guard(&self) -> &ObjectGuard {
        &self.core.guard
    }

    /// Enabling always succeeds; lifting restrictions during a call does
    /// not.
    pub fn set_restrictions(&mut self, enabled: bool) -> Result<(), SandboxError> {
        let in_call = self.core.in_call();
        self.core.guard.set_restrictions(enabled, in_call)
    }

    pub fn is_restricted(&self) -> bool {
        self.core.guard.is_restricted()
    }

    pub fn allow_class(&mut self, name: &str) {
        self.core.guard.allow_class(name);
    }

    pub fn remove_allowed_class(&mut self, name: &str) -> Result<(), SandboxError> {
        let in_call = self.core.in_call();
        self.core.guard.remove_allowed_class(name, in_call)
    }

    pub fn allow_object(&mut self, object: ObjectId) {
        self.core.guard.allow_object(object);
    }

    pub fn remove_allowed_object(&mut self, object: ObjectId) -> Result<(), SandboxError> {
        let in_call = self.core.in_call();
        self.core.guard.remove_allowed_object(object, in_call)
    }

    pub fn set_class_allowed(&mut self, predicate: Option<ClassPredicate>) -> Result<(), SandboxError> {
        let in_call = self.core.in_call();
        self.core.guard.set_class_allowed(predicate, in_call)
    }

    pub fn set_object_allowed(&mut self, predicate: Option<ObjectPredicate>) -> Result<(), SandboxError> {
        let in_call = self.core.in_call();
        self.core.guard.set_object_allowed(predicate, in_call)
    }

    pub fn set_method_allowed(&mut self, predicate: Option<MethodPredicate>) -> Result<(), SandboxError> {
        let in_call = self.core.in_call();
        self.core.guard.set_method_allowed(predicate, in_call)
    }

    pub fn set_property_allowed(&mut self, predicate: Option<PropertyPredicate>) -> Result<(), SandboxError> {
        let in_call = self.core.in_call();
        self.core.guard.set_property_allowed(predicate, in_call)
    }

    pub fn set_resource_allowed(&mut self, predicate: Option<ResourcePredicate>) -> Result<(), SandboxError> {
        let in_call = self.core.in_call();
        self.core.guard.set_resource_allowed(predicate, in_call)
    }

    fn check_sharing(&self, operation: &'static str) -> Result<(), SandboxError> {
        if self.core.in_call() {
            return Err(SandboxError::CallInProgress(operation));
        }
        if self.config.flat_address_space {
            return Err(SandboxError::Config(format!("{operation} is unavailable with a flat address space")));
        }
        Ok(())
    }

    /// Maps `buffer` into guest memory and returns its guest address.
    pub fn share(&mut self, buffer: SharedBuffer, allow_write: bool) -> Result<u32, SandboxError> {
        self.check_sharing("share")?;
        self.shared.share(&mut self.machine.memory, buffer, allow_write)
    }

    pub fn unshare(&mut self, address: u32) -> Result<(), SandboxError> {
        self.check_sharing("unshare")?;
        self.shared.unshare(&mut self.machine.memory, address)
    }

    pub fn shared_ranges(&self) -> usize {
        self.shared.len()
    }

    /// Advances host time by `delta` seconds and runs whatever the host
    /// scheduled: timer callbacks and deferred calls. One result per call,
    /// in order.
    pub fn process(&mut self, delta: f64) -> Vec<Result<Variant, SandboxError>> {
        let pending = self.core.host.process(delta);
        let mut results = Vec::with_capacity(pending.len());
        for call in pending {
            let result = match &call.callable {
                Callable::Guest { owner, .. } if *owner != self.core.self_object => {
                    log::warn!("dropping a callback for {owner}, this sandbox runs for {}", self.core.self_object);
                    Err(SandboxError::InvalidArgument(format!("callable belongs to {owner}")))
                }
                Callable::Guest { .. } => {
                    if !self.loaded {
                        Err(SandboxError::NoProgram)
                    } else {
                        self.install_translation();
                        self.core.invoke_callable(&mut self.machine, &call.callable, &call.args)
                    }
                }
                Callable::Method { .. } => self.core.invoke_callable(&mut self.machine, &call.callable, &call.args),
            };
            results.push(result);
        }
        results
    }

    pub fn counters(&self) -> CallCounters {
        self.core.counters
    }

    pub fn call_depth(&self) -> usize {
        self.core.calls.depth()
    }

    pub fn in_call(&self) -> bool {
        self.core.in_call()
    }

    /// Where the last failed call stopped.
    pub fn last_fault(&self) -> Option<&FaultReport> {
        self.core.fault.as_ref()
    }

    /// Keeps `value` available to the guest across calls. Returns the
    /// (negative) store index.
    pub fn create_permanent(&mut self, value: Variant) -> i32 {
        self.core.variants.insert_permanent(value)
    }

    pub fn release_permanent(&mut self, index: i32) -> bool {
        self.core.variants.release_permanent(index)
    }

    pub fn permanent_value(&self, index: i32) -> Result<&Variant, SandboxError> {
        if index >= 0 {
            return Err(SandboxError::InvalidReference(index));
        }
        self.core.variants.get(index)
    }

    pub fn variants(&self) -> &ScopedVariants {
        &self.core.variants
    }

    pub fn set_max_refs(&mut self, max_refs: usize) -> Result<(), SandboxError> {
        if self.core.in_call() {
            return Err(SandboxError::CallInProgress("set_max_refs"));
        }
        if max_refs == 0 {
            return Err(SandboxError::Config("max_refs must be at least 1".into()));
        }
        self.config.max_refs = max_refs;
        self.core.variants.set_max_refs(max_refs);
        self.core.objects.set_max_refs(max_refs);
        Ok(())
    }

    pub fn set_max_call_depth(&mut self, depth: usize) -> Result<(), SandboxError> {
        if self.core.in_call() {
            return Err(SandboxError::CallInProgress("set_max_call_depth"));
        }
        if depth == 0 {
            return Err(SandboxError::Config("max_call_depth must be at least 1".into()));
        }
        self.config.max_call_depth = depth;
        self.core.calls.set_max_depth(depth);
        Ok(())
    }

    /// Budget of each following top-level call.
    pub fn set_max_instructions(&mut self, max: u64) -> Result<(), SandboxError> {
        if max == 0 {
            return Err(SandboxError::Config("max_instructions must be at least 1".into()));
        }
        self.config.max_instructions = max;
        self.core.max_instructions = max;
        Ok(())
    }
}
