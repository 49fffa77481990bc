/// A WebAssembly proposal that can be switched on in a [`Config`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Proposal {
    Annotations,
    BulkMemoryOperations,
    ExceptionHandling,
    FunctionReferences,
    Memory64,
    ReferenceTypes,
    Simd,
    TailCall,
    Threads,
}

/// A host module the VM facade pre-registers at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HostRegistration {
    Wasi,
    ProcessEnv,
}

/// The default page limit for memory instances (a full 32-bit address
/// space: 65536 pages of 64 KiB).
pub const DEFAULT_MAX_MEMORY_PAGES: u32 = 65536;

/// Configuration snapshot shared by the loader, validator, interpreter and
/// VM facade.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    proposals: u32,
    host_registrations: u32,
    max_memory_pages: u32,
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_proposal(&mut self, proposal: Proposal) -> &mut Self {
        self.proposals |= proposal_bit(proposal);
        self
    }

    pub fn remove_proposal(&mut self, proposal: Proposal) -> &mut Self {
        self.proposals &= !proposal_bit(proposal);
        self
    }

    pub fn has_proposal(&self, proposal: Proposal) -> bool {
        self.proposals & proposal_bit(proposal) != 0
    }

    pub fn add_host_registration(&mut self, host: HostRegistration) -> &mut Self {
        self.host_registrations |= host_bit(host);
        self
    }

    pub fn remove_host_registration(&mut self, host: HostRegistration) -> &mut Self {
        self.host_registrations &= !host_bit(host);
        self
    }

    pub fn has_host_registration(&self, host: HostRegistration) -> bool {
        self.host_registrations & host_bit(host) != 0
    }

    /// Limit the page count of every memory instance created under this
    /// configuration. Modules declaring more are rejected by validation.
    pub fn set_max_memory_pages(&mut self, pages: u32) -> &mut Self {
        self.max_memory_pages = pages.min(DEFAULT_MAX_MEMORY_PAGES);
        self
    }

    pub fn max_memory_pages(&self) -> u32 {
        self.max_memory_pages
    }
}

impl Default for Config {
    fn default() -> Self {
        let mut config = Self {
            proposals: 0,
            host_registrations: 0,
            max_memory_pages: DEFAULT_MAX_MEMORY_PAGES,
        };
        // What current toolchains emit without flags.
        config
            .add_proposal(Proposal::BulkMemoryOperations)
            .add_proposal(Proposal::ReferenceTypes);
        config
    }
}

fn proposal_bit(proposal: Proposal) -> u32 {
    1 << (proposal as u32)
}

fn host_bit(host: HostRegistration) -> u32 {
    1 << (host as u32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn proposals_toggle_independently() {
        let mut config = Config::new();
        assert!(config.has_proposal(Proposal::BulkMemoryOperations));
        assert!(config.has_proposal(Proposal::ReferenceTypes));
        assert!(!config.has_proposal(Proposal::Simd));

        config.add_proposal(Proposal::Simd);
        config.remove_proposal(Proposal::BulkMemoryOperations);
        assert!(config.has_proposal(Proposal::Simd));
        assert!(!config.has_proposal(Proposal::BulkMemoryOperations));
        assert!(config.has_proposal(Proposal::ReferenceTypes));
    }

    #[test]
    fn page_cap_is_clamped() {
        let mut config = Config::new();
        assert_eq!(config.max_memory_pages(), DEFAULT_MAX_MEMORY_PAGES);
        config.set_max_memory_pages(1024);
        assert_eq!(config.max_memory_pages(), 1024);
        config.set_max_memory_pages(u32::MAX);
        assert_eq!(config.max_memory_pages(), DEFAULT_MAX_MEMORY_PAGES);
    }
}
