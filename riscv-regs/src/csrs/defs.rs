// Copyright (c) 2022 by Rivos Inc.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

use tock_registers::register_bitfields;

// CSR numbers used by the hypervisor.
pub const CSR_SSTATUS: u16 = 0x100;
pub const CSR_SCOUNTEREN: u16 = 0x106;
pub const CSR_SCAUSE: u16 = 0x142;
pub const CSR_STVAL: u16 = 0x143;
pub const CSR_TIME: u16 = 0xc01;
pub const CSR_HSTATUS: u16 = 0x600;
pub const CSR_HVIP: u16 = 0x645;
pub const CSR_HTVAL: u16 = 0x643;
pub const CSR_HTINST: u16 = 0x64a;
pub const CSR_VSSTATUS: u16 = 0x200;
pub const CSR_VSIE: u16 = 0x204;
pub const CSR_VSTVEC: u16 = 0x205;
pub const CSR_VSSCRATCH: u16 = 0x240;
pub const CSR_VSEPC: u16 = 0x241;
pub const CSR_VSCAUSE: u16 = 0x242;
pub const CSR_VSTVAL: u16 = 0x243;
pub const CSR_VSATP: u16 = 0x280;

// Supervisor status. Also the layout of vsstatus.
register_bitfields![u64,
    pub sstatus [
        // Enable or disable all interrupts in S-mode.
        sie OFFSET(1) NUMBITS(1) [],
        // Indicates whether supervisor interrupts were enabled prior
        // to trapping into S-mode.
        spie OFFSET(5) NUMBITS(1) [],
        // Privilege level hart was executing before entering S-mode.
        spp OFFSET(8) NUMBITS(1) [
            User = 0,
            Supervisor = 1,
        ],
        // Encodes the status of the floating-point unit.
        fs OFFSET(13) NUMBITS(2) [
            Off = 0,
            Initial = 1,
            Clean = 2,
            Dirty = 3,
        ],
        sd OFFSET(63) NUMBITS(1) [],
    ]
];

// Supervisor trap cause.
register_bitfields![u64,
    pub scause [
        is_interrupt OFFSET(63) NUMBITS(1) [],
        reason OFFSET(0) NUMBITS(63) []
    ],
    // Implementations may use the upper bits of the reason for their own purposes; only the
    // standard values are decoded.
    pub(crate) reason [
        reserved OFFSET(5) NUMBITS(58) [],
        std OFFSET(0) NUMBITS(5) []
    ]
];

// Hypervisor status.
register_bitfields![u64,
    pub hstatus [
        // A guest virtual address was written to stval as a result of the trap.
        gva OFFSET(6) NUMBITS(1) [],
        // Virtualization mode at time of trap.
        spv OFFSET(7) NUMBITS(1) [],
        // Privilege level the virtual hart was executing before entering HS-mode.
        spvp OFFSET(8) NUMBITS(1) [
            User = 0,
            Supervisor = 1,
        ],
        // Trap on WFI timeout.
        vtw OFFSET(21) NUMBITS(1) [],
        // Native base integer ISA width for VS-mode.
        vsxl OFFSET(32) NUMBITS(2) [
            Xlen32 = 1,
            Xlen64 = 2,
        ],
    ]
];

// Hypervisor virtual interrupt pending.
register_bitfields![u64,
    pub hvip [
        vssoft OFFSET(2) NUMBITS(1) [],
        vstimer OFFSET(6) NUMBITS(1) [],
        vsext OFFSET(10) NUMBITS(1) [],
    ]
];

// Hypervisor trap instruction.
register_bitfields![u64,
    pub htinst [
        // Bits 1:0 are 0b01 if the trapping instruction was compressed, 0b11 otherwise.
        length OFFSET(0) NUMBITS(2) [
            Compressed = 1,
            Standard = 3,
        ],
        instruction OFFSET(0) NUMBITS(32) [],
    ]
];
