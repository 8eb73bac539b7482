//! # On-Demand Register Allocator
//!
//! Binds names (variables, temporaries, return slots) to the six x86
//! general-purpose registers while code is being printed, spilling to the
//! current activation record when it runs out:
//!
//! 1. `alloc` reuses an existing binding, else takes a free register, else
//!    evicts a victim (least-recently-used by default) and stores it
//! 2. `store` gives a name a frame slot on first spill (`sub esp, 4`)
//! 3. `addr` computes the slot address, following the static-link chain
//!    when the name belongs to a lexically enclosing procedure
//!
//! `eax` is the scratch/accumulator register: static-link walks, division
//! and return values go through it, so `alloc` never hands it out.
//!
//! ## Frame layout
//!
//! ```text
//! [ebp+12+4i]  parameter i
//! [ebp+8]      static link (frame pointer of the lexical parent)
//! [ebp+4]      return address
//! [ebp]        saved ebp
//! [ebp-4k]     declared variables, then spilled temporaries
//! ```

use super::asm::AsmOut;
use super::env::ScopedEnv;
use super::symbols::Loc;
use super::CompileOptions;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Offset of the static link from the frame pointer
pub const STATIC_LINK_OFFSET: i32 = 8;

/// Offset of the first parameter from the frame pointer
pub const FIRST_PARAM_OFFSET: i32 = 12;

/// Reserved name of the value returned by the last call (always in `eax`)
pub const RETURN_VALUE: &str = "~ret";

/// x86 general-purpose register
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Register {
    /// Accumulator; scratch and return value
    Eax,
    /// Counter
    Ecx,
    /// Data; clobbered by division
    Edx,
    /// Base
    Ebx,
    /// Source index
    Esi,
    /// Destination index
    Edi,
}

impl Register {
    /// Every register in the binding table, in table order
    pub const ALL: [Register; 6] = [
        Register::Eax,
        Register::Ecx,
        Register::Edx,
        Register::Ebx,
        Register::Esi,
        Register::Edi,
    ];

    /// Registers `alloc` may hand out, in preference order
    pub const ALLOCATABLE: [Register; 5] = [
        Register::Ecx,
        Register::Edx,
        Register::Ebx,
        Register::Esi,
        Register::Edi,
    ];

    /// Scratch register used for address computation
    pub const SCRATCH: Register = Register::Eax;

    /// Assembly name
    pub fn as_str(&self) -> &'static str {
        match self {
            Register::Eax => "eax",
            Register::Ecx => "ecx",
            Register::Edx => "edx",
            Register::Ebx => "ebx",
            Register::Esi => "esi",
            Register::Edi => "edi",
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Victim selection when every allocatable register is taken
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EvictionPolicy {
    /// Evict the register bound or reused longest ago
    #[default]
    Lru,
    /// Evict registers in fixed rotation
    RoundRobin,
}

/// Base of a memory operand
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Base {
    /// The current frame pointer (`ebp`)
    FramePointer,
    /// A register holding some other frame pointer or an address
    Reg(Register),
}

impl fmt::Display for Base {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Base::FramePointer => f.write_str("ebp"),
            Base::Reg(r) => r.fmt(f),
        }
    }
}

/// Memory address `[base + offset]`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Address {
    /// Base register
    pub base: Base,
    /// Byte displacement
    pub offset: i32,
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.offset == 0 && self.base != Base::FramePointer {
            write!(f, "[{}]", self.base)
        } else {
            write!(f, "[{}{:+}]", self.base, self.offset)
        }
    }
}

/// Register allocation contract
///
/// Implementations print spill/reload code as a side effect; every method
/// must be called in the order the surrounding instructions are emitted.
pub trait RegisterAllocator {
    /// Physical register type
    type Reg: Copy + Eq + fmt::Display;
    /// Memory address type
    type Addr: fmt::Display;

    /// Register bound to `name`, binding (and spilling) if necessary
    fn alloc(&mut self, name: &str) -> Result<Self::Reg>;
    /// Force-bind `reg` to `name`; no spill, no occupancy check
    fn remap(&mut self, reg: Self::Reg, name: &str);
    /// Free every register bound to `name`
    fn release(&mut self, name: &str);
    /// Free `reg`, discarding its binding
    fn release_register(&mut self, reg: Self::Reg);
    /// Make the value of `name` available in `target`; bindings unchanged
    fn load(&mut self, name: &str, target: Self::Reg) -> Result<Self::Reg>;
    /// Store the occupant of `reg` and free it
    fn spill(&mut self, reg: Self::Reg) -> Result<()>;
    /// Give `name` a slot if needed and store every register bound to it
    fn store(&mut self, name: &str) -> Result<()>;
    /// `None` if `name` is in a register, else its memory operand
    fn locate(&mut self, name: &str) -> Result<Option<String>>;
    /// Address of the slot holding `name`
    fn addr(&mut self, name: &str) -> Result<Self::Addr>;
}

/// Spill/reload counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AllocStats {
    /// Registers written back to memory
    pub spills: usize,
    /// Memory-to-register loads
    pub reloads: usize,
    /// Evictions forced by register pressure
    pub evictions: usize,
    /// Slots created for spilled names
    pub spill_slots: usize,
}

#[derive(Debug, Clone, Default)]
struct Binding {
    name: Option<String>,
    last_used: u64,
}

/// Allocator for 32-bit x86 with static-link addressing
#[derive(Debug, Clone)]
pub struct SimpleAllocator {
    /// Binding table, indexed by `Register::index`
    bindings: [Binding; 6],
    /// Storage locations, scoped like the procedures that own them
    locs: ScopedEnv<Loc>,
    /// Output listing
    out: AsmOut,
    /// Lowest offset handed out in the current frame
    frame_offset: i32,
    /// Frame offsets of the enclosing frames
    saved_offsets: Vec<i32>,
    word_size: i32,
    policy: EvictionPolicy,
    /// Logical clock for LRU
    clock: u64,
    /// Round-robin cursor into `ALLOCATABLE`
    cursor: usize,
    /// Registers withheld from allocation, indexed by `Register::index`
    pinned: [bool; 6],
    stats: AllocStats,
}

impl SimpleAllocator {
    /// Allocator with default options
    pub fn new() -> Self {
        Self::with_options(&CompileOptions::default())
    }

    /// Allocator configured from compile options
    pub fn with_options(options: &CompileOptions) -> Self {
        Self {
            bindings: Default::default(),
            locs: ScopedEnv::new(),
            out: AsmOut::new(options.annotate),
            frame_offset: 0,
            saved_offsets: Vec::new(),
            word_size: options.word_size as i32,
            policy: options.eviction,
            clock: 0,
            cursor: 0,
            pinned: [false; 6],
            stats: AllocStats::default(),
        }
    }

    /// Register currently holding `name`
    ///
    /// [`RETURN_VALUE`] always resolves to `eax`.
    pub fn resident(&self, name: &str) -> Option<Register> {
        if name == RETURN_VALUE {
            return Some(Register::Eax);
        }
        self.bound(name).next()
    }

    /// Registers bound to `name`, in table order
    fn bound<'a>(&'a self, name: &'a str) -> impl Iterator<Item = Register> + 'a {
        Register::ALL
            .into_iter()
            .filter(move |r| self.bindings[r.index()].name.as_deref() == Some(name))
    }

    /// Name bound to `reg`
    pub fn occupant(&self, reg: Register) -> Option<&str> {
        self.bindings[reg.index()].name.as_deref()
    }

    /// Current (register, name) bindings
    pub fn bindings(&self) -> impl Iterator<Item = (Register, &str)> + '_ {
        Register::ALL
            .into_iter()
            .filter_map(|r| self.occupant(r).map(|n| (r, n)))
    }

    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    fn bind(&mut self, reg: Register, name: &str) {
        let now = self.tick();
        let binding = &mut self.bindings[reg.index()];
        binding.name = Some(name.to_string());
        binding.last_used = now;
    }

    /// Withhold `reg` from allocation and eviction until [`unpin`](Self::unpin)
    ///
    /// The caller spills the register first; pinning does not store it.
    pub fn pin(&mut self, reg: Register) {
        self.pinned[reg.index()] = true;
    }

    /// Return `reg` to the allocatable pool
    pub fn unpin(&mut self, reg: Register) {
        self.pinned[reg.index()] = false;
    }

    /// True if `reg` is withheld from allocation
    pub fn is_pinned(&self, reg: Register) -> bool {
        self.pinned[reg.index()]
    }

    /// Allocatable registers that are not pinned
    fn candidates(&self) -> impl Iterator<Item = Register> + '_ {
        Register::ALLOCATABLE
            .into_iter()
            .filter(move |r| !self.pinned[r.index()])
    }

    fn free_register(&self, avoid: Option<Register>) -> Option<Register> {
        self.candidates()
            .filter(|r| Some(*r) != avoid)
            .find(|r| self.bindings[r.index()].name.is_none())
    }

    fn choose_victim(&mut self) -> Result<Register> {
        match self.policy {
            EvictionPolicy::Lru => self
                .candidates()
                .min_by_key(|r| self.bindings[r.index()].last_used)
                .ok_or(Error::NoFreeRegister),
            EvictionPolicy::RoundRobin => {
                let len = Register::ALLOCATABLE.len();
                for _ in 0..len {
                    let reg = Register::ALLOCATABLE[self.cursor % len];
                    self.cursor = (self.cursor + 1) % len;
                    if !self.is_pinned(reg) {
                        return Ok(reg);
                    }
                }
                Err(Error::NoFreeRegister)
            }
        }
    }

    /// True if addressing `name` walks a static link or dereferences a
    /// reference parameter, clobbering `eax`
    fn uses_scratch(&self, name: &str) -> bool {
        let Some(loc) = self.locs.find(name, true) else {
            return false;
        };
        let declared = self.locs.depth_of(name).unwrap_or(0);
        loc.is_ref || self.locs.depth() > declared
    }

    /// Move the occupant of `eax` into an allocatable register
    ///
    /// Takes a free register other than `avoid`, or else evicts the least
    /// recently used name whose write-back does not itself need `eax`.
    /// Returns the register now holding the former occupant.
    fn evacuate_scratch(&mut self, avoid: Option<Register>) -> Result<Option<Register>> {
        let scratch = Register::SCRATCH;
        let Some(name) = self.bindings[scratch.index()].name.clone() else {
            return Ok(None);
        };

        let target = match self.free_register(avoid) {
            Some(reg) => reg,
            None => {
                let victim = self
                    .candidates()
                    .filter(|r| Some(*r) != avoid)
                    .filter(|r| self.occupant(*r).map_or(true, |n| !self.uses_scratch(n)))
                    .min_by_key(|r| self.bindings[r.index()].last_used)
                    .ok_or_else(|| Error::ScratchBusy { name: name.clone() })?;
                self.stats.evictions += 1;
                self.spill(victim)?;
                victim
            }
        };

        tracing::debug!(name = name.as_str(), register = %target, "moved out of scratch");
        self.out.emit(format!("mov {}, {}", target, scratch));
        let last_used = self.bindings[scratch.index()].last_used;
        self.bindings[scratch.index()].name = None;
        self.bindings[target.index()] = Binding {
            name: Some(name),
            last_used,
        };
        Ok(Some(target))
    }

    /// Emit code leaving the frame pointer of the activation `distance`
    /// static links up in the returned base
    ///
    /// Distance 0 is the current frame (`ebp`); otherwise the static link
    /// is loaded into `eax` and followed `distance - 1` more times. A name
    /// bound to `eax` is moved to another register first.
    pub fn frame_at(&mut self, distance: usize) -> Result<Base> {
        if distance == 0 {
            return Ok(Base::FramePointer);
        }
        self.evacuate_scratch(None)?;
        let scratch = Register::SCRATCH;
        self.out.emit(format!(
            "mov {}, dword [ebp{:+}]",
            scratch, STATIC_LINK_OFFSET
        ));
        for _ in 1..distance {
            self.out.emit(format!(
                "mov {}, dword [{}{:+}]",
                scratch, scratch, STATIC_LINK_OFFSET
            ));
        }
        Ok(Base::Reg(scratch))
    }

    /// Reserve a slot for a declared variable in the current frame
    ///
    /// Emits nothing; the routine prologue reserves all declared slots at
    /// once. Returns the slot offset.
    pub fn declare(&mut self, name: &str) -> i32 {
        self.frame_offset -= self.word_size;
        let mut loc = Loc::new(name, self.frame_offset);
        loc.in_mem = true;
        self.locs.push(loc);
        self.frame_offset
    }

    /// Record the slot of parameter `index` of the current routine
    pub fn bind_param(&mut self, name: &str, index: usize, by_ref: bool) -> i32 {
        let offset = FIRST_PARAM_OFFSET + self.word_size * index as i32;
        let mut loc = if by_ref {
            Loc::reference(name, offset)
        } else {
            Loc::new(name, offset)
        };
        loc.in_mem = true;
        self.locs.push(loc);
        offset
    }

    /// Open the frame of a nested routine
    pub fn enter_frame(&mut self) {
        self.saved_offsets.push(self.frame_offset);
        self.frame_offset = 0;
        self.locs.tag();
        tracing::debug!(depth = self.locs.depth(), "frame entered");
    }

    /// Close the current frame, dropping its locations and bindings
    pub fn leave_frame(&mut self) {
        self.locs.detag();
        self.frame_offset = self.saved_offsets.pop().unwrap_or(0);
        self.release_all();
        tracing::debug!(depth = self.locs.depth(), "frame left");
    }

    /// Spill every bound register
    pub fn spill_all(&mut self) -> Result<()> {
        for reg in Register::ALL {
            self.spill(reg)?;
        }
        Ok(())
    }

    /// Forget every binding without storing
    pub fn release_all(&mut self) {
        for binding in &mut self.bindings {
            binding.name = None;
        }
    }

    /// True if `name` has a storage location visible from here
    pub fn has_slot(&self, name: &str) -> bool {
        self.locs.contains(name, true)
    }

    /// Lowest offset handed out in the current frame (0 or negative)
    pub fn frame_offset(&self) -> i32 {
        self.frame_offset
    }

    /// Bytes per stack slot
    pub fn word_size(&self) -> i32 {
        self.word_size
    }

    /// Lexical depth of the code being generated
    pub fn depth(&self) -> usize {
        self.locs.depth()
    }

    /// Storage locations
    pub fn locations(&self) -> &ScopedEnv<Loc> {
        &self.locs
    }

    /// Storage locations, for callers that push their own entries
    pub fn locations_mut(&mut self) -> &mut ScopedEnv<Loc> {
        &mut self.locs
    }

    /// Output listing
    pub fn out(&self) -> &AsmOut {
        &self.out
    }

    /// Output listing, for callers emitting non-allocating instructions
    pub fn out_mut(&mut self) -> &mut AsmOut {
        &mut self.out
    }

    /// Consume the allocator, keeping the listing
    pub fn into_output(self) -> AsmOut {
        self.out
    }

    /// Spill/reload counters
    pub fn stats(&self) -> AllocStats {
        self.stats
    }

    /// Render the register map as assembly comments
    pub fn dump(&self) -> String {
        let mut out = String::from(";; ------------ register mapping ----------------\n");
        for (reg, name) in self.bindings() {
            out.push_str(&format!(";; {} : {}\n", reg, name));
        }
        out.push_str(";; ----------------------------------------------\n");
        out
    }
}

impl Default for SimpleAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl RegisterAllocator for SimpleAllocator {
    type Reg = Register;
    type Addr = Address;

    /// A name bound to `eax` through [`remap`](Self::remap) is moved to an
    /// allocatable register, so the scratch register is never returned.
    fn alloc(&mut self, name: &str) -> Result<Register> {
        if self.occupant(Register::SCRATCH) == Some(name) {
            self.evacuate_scratch(None)?;
        }
        let bound = self.bound(name).next();
        if let Some(reg) = bound {
            let now = self.tick();
            self.bindings[reg.index()].last_used = now;
            return Ok(reg);
        }

        if let Some(reg) = self.free_register(None) {
            self.bind(reg, name);
            return Ok(reg);
        }

        let victim = self.choose_victim()?;
        tracing::debug!(
            register = %victim,
            evicted = self.occupant(victim).unwrap_or(""),
            for_name = name,
            "evicting register"
        );
        self.stats.evictions += 1;
        self.spill(victim)?;
        self.bind(victim, name);
        Ok(victim)
    }

    /// Any other register bound to `name` is released. A name bound to
    /// `eax` is moved out before the next static-link walk.
    fn remap(&mut self, reg: Register, name: &str) {
        self.release(name);
        self.bind(reg, name);
    }

    fn release(&mut self, name: &str) {
        for binding in &mut self.bindings {
            if binding.name.as_deref() == Some(name) {
                binding.name = None;
            }
        }
    }

    fn release_register(&mut self, reg: Register) {
        self.bindings[reg.index()].name = None;
    }

    fn load(&mut self, name: &str, target: Register) -> Result<Register> {
        match self.resident(name) {
            Some(reg) if reg == target => {}
            Some(reg) => self.out.emit(format!("mov {}, {}", target, reg)),
            None => {
                if self.uses_scratch(name) {
                    self.evacuate_scratch(Some(target))?;
                }
                let addr = self.addr(name)?;
                self.out.emit(format!("mov {}, dword {}", target, addr));
                self.stats.reloads += 1;
            }
        }
        Ok(target)
    }

    fn spill(&mut self, reg: Register) -> Result<()> {
        if let Some(name) = self.bindings[reg.index()].name.clone() {
            self.store(&name)?;
            self.release(&name);
            self.stats.spills += 1;
        }
        Ok(())
    }

    fn store(&mut self, name: &str) -> Result<()> {
        // A name already owning a slot here or in an enclosing frame is
        // written back there; only slot-less names get a fresh local slot.
        if !self.locs.contains(name, true) {
            self.frame_offset -= self.word_size;
            self.locs.push(Loc::new(name, self.frame_offset));
            self.stats.spill_slots += 1;
            self.out.emit(format!("sub esp, {}", self.word_size));
            tracing::debug!(name, offset = self.frame_offset, "spill slot created");
        }

        if self.uses_scratch(name) {
            self.evacuate_scratch(None)?;
        }
        let regs: Vec<Register> = self.bound(name).collect();
        for reg in regs {
            let addr = self.addr(name)?;
            self.out.emit(format!("mov dword {}, {}", addr, reg));
        }
        if let Some(loc) = self.locs.find_mut(name, true) {
            loc.in_mem = true;
        }
        Ok(())
    }

    fn locate(&mut self, name: &str) -> Result<Option<String>> {
        if self.resident(name).is_some() {
            return Ok(None);
        }
        Ok(Some(format!("dword {}", self.addr(name)?)))
    }

    fn addr(&mut self, name: &str) -> Result<Address> {
        let loc = self
            .locs
            .find(name, true)
            .cloned()
            .ok_or_else(|| Error::NoStorage {
                name: name.to_string(),
            })?;
        let declared = self.locs.depth_of(name).unwrap_or(0);
        let distance = self.locs.depth().saturating_sub(declared);

        let slot = Address {
            base: self.frame_at(distance)?,
            offset: loc.offset,
        };
        if !loc.is_ref {
            return Ok(slot);
        }

        if distance == 0 {
            self.evacuate_scratch(None)?;
        }
        let scratch = Register::SCRATCH;
        self.out.emit(format!("mov {}, dword {}", scratch, slot));
        Ok(Address {
            base: Base::Reg(scratch),
            offset: 0,
        })
    }
}
