use alloy_primitives::{b256, B256};

/// Average L1 slot time, used when the cadence estimate is unavailable.
pub const SECS_PER_L1_BLOCK: u64 = 12;

/// keccak256("TransactionDeposited(address,address,uint256,bytes)")
pub const TRANSACTION_DEPOSITED_SIG: B256 =
    b256!("0xb3813568d9991fc951961fcb4c784893574240a28925604d09fc577c55bb7c32");

/// EIP-2718 type byte the OP Stack assigns to deposit transactions.
pub const DEPOSIT_TX_TYPE: u8 = 0x7e;
