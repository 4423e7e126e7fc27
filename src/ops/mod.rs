//! Contract operations the bot submits
//!
//! Encodes router swaps, token approvals and the daily check-in into
//! `OperationDescriptor`s. The submission core treats the resulting call data
//! as opaque.

use crate::config::ContractsConfig;
use crate::error::{PilotError, PilotResult};
use crate::tx::OperationDescriptor;

use ethers::abi::{parse_abi, Abi, Token};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, Bytes, TransactionRequest, U256};
use ethers::utils::{format_ether, parse_ether};
use std::str::FromStr;

const APPROVE_GAS: u64 = 100_000;
const SWAP_GAS: u64 = 300_000;
const CHECKIN_GAS: u64 = 120_000;
const DEFAULT_GAS_PRICE_GWEI: u64 = 10;
const SWAP_DEADLINE_SECS: i64 = 300;

const SIGNATURES: &[&str] = &[
    "function approve(address spender, uint256 value) returns (bool)",
    "function balanceOf(address account) view returns (uint256)",
    "function swapExactETHForTokens(uint256 amountOutMin, address[] path, address to, uint256 deadline) payable returns (uint256[])",
    "function swapExactTokensForETH(uint256 amountIn, uint256 amountOutMin, address[] path, address to, uint256 deadline) returns (uint256[])",
    "function checkIn()",
];

/// Resolved contract addresses
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Contracts {
    pub router: Address,
    pub token: Address,
    pub wrapped_native: Address,
    pub checkin: Address,
}

impl Contracts {
    pub fn from_config(config: &ContractsConfig) -> PilotResult<Self> {
        Ok(Self {
            router: parse_address("router", &config.router)?,
            token: parse_address("token", &config.token)?,
            wrapped_native: parse_address("wrapped_native", &config.wrapped_native)?,
            checkin: parse_address("checkin", &config.checkin)?,
        })
    }
}

fn parse_address(name: &str, raw: &str) -> PilotResult<Address> {
    Address::from_str(raw.trim())
        .map_err(|e| PilotError::Config(format!("Invalid {} address '{}': {}", name, raw, e)))
}

/// Builds descriptors for one sending account
pub struct OperationEncoder {
    sender: Address,
    contracts: Contracts,
    abi: Abi,
    gas_price: U256,
}

impl OperationEncoder {
    pub fn new(sender: Address, contracts: Contracts) -> PilotResult<Self> {
        let abi = parse_abi(SIGNATURES)
            .map_err(|e| PilotError::Encoding(format!("Bad contract signature: {}", e)))?;

        Ok(Self {
            sender,
            contracts,
            abi,
            gas_price: U256::from(DEFAULT_GAS_PRICE_GWEI) * U256::exp10(9),
        })
    }

    pub fn sender(&self) -> Address {
        self.sender
    }

    fn encode(&self, function: &str, args: &[Token]) -> PilotResult<Bytes> {
        let data = self
            .abi
            .function(function)
            .and_then(|f| f.encode_input(args))
            .map_err(|e| PilotError::Encoding(format!("{}: {}", function, e)))?;
        Ok(Bytes::from(data))
    }

    fn descriptor(&self, label: &str, to: Address, data: Bytes, gas_limit: u64) -> OperationDescriptor {
        OperationDescriptor::new(label, self.sender, to, data)
            .with_gas_limit(gas_limit)
            .with_gas_price(self.gas_price)
    }

    /// Allow the router to spend `amount` of the token
    pub fn approve(&self, amount: U256) -> PilotResult<OperationDescriptor> {
        let data = self.encode(
            "approve",
            &[Token::Address(self.contracts.router), Token::Uint(amount)],
        )?;
        Ok(self.descriptor("approve", self.contracts.token, data, APPROVE_GAS))
    }

    /// Swap `amount_in` native units for the token through the wrapped native
    pub fn swap_native_for_token(
        &self,
        amount_in: U256,
        min_out: U256,
    ) -> PilotResult<OperationDescriptor> {
        let path = vec![
            Token::Address(self.contracts.wrapped_native),
            Token::Address(self.contracts.token),
        ];
        let data = self.encode(
            "swapExactETHForTokens",
            &[
                Token::Uint(min_out),
                Token::Array(path),
                Token::Address(self.sender),
                Token::Uint(swap_deadline()),
            ],
        )?;
        Ok(self
            .descriptor("swap_native_for_token", self.contracts.router, data, SWAP_GAS)
            .with_value(amount_in))
    }

    /// Swap `amount_in` of the token back to native units
    pub fn swap_token_for_native(
        &self,
        amount_in: U256,
        min_out: U256,
    ) -> PilotResult<OperationDescriptor> {
        let path = vec![
            Token::Address(self.contracts.token),
            Token::Address(self.contracts.wrapped_native),
        ];
        let data = self.encode(
            "swapExactTokensForETH",
            &[
                Token::Uint(amount_in),
                Token::Uint(min_out),
                Token::Array(path),
                Token::Address(self.sender),
                Token::Uint(swap_deadline()),
            ],
        )?;
        Ok(self.descriptor("swap_token_for_native", self.contracts.router, data, SWAP_GAS))
    }

    pub fn check_in(&self) -> PilotResult<OperationDescriptor> {
        let data = self.encode("checkIn", &[])?;
        Ok(self.descriptor("check_in", self.contracts.checkin, data, CHECKIN_GAS))
    }

    /// Read-only `balanceOf(sender)` request against the token
    pub fn token_balance_call(&self) -> PilotResult<TypedTransaction> {
        let data = self.encode("balanceOf", &[Token::Address(self.sender)])?;
        Ok(TransactionRequest::new()
            .to(self.contracts.token)
            .data(data)
            .into())
    }

    pub fn decode_balance(&self, output: &Bytes) -> PilotResult<U256> {
        let tokens = self
            .abi
            .function("balanceOf")
            .and_then(|f| f.decode_output(output.as_ref()))
            .map_err(|e| PilotError::Encoding(format!("balanceOf output: {}", e)))?;

        tokens
            .into_iter()
            .next()
            .and_then(Token::into_uint)
            .ok_or_else(|| PilotError::Encoding("balanceOf returned no uint".to_string()))
    }
}

fn swap_deadline() -> U256 {
    let deadline = chrono::Utc::now().timestamp() + SWAP_DEADLINE_SECS;
    U256::from(deadline.max(0) as u64)
}

/// Convert a decimal amount in ether units to wei, keeping `decimals` places
pub fn to_wei(amount: f64, decimals: usize) -> PilotResult<U256> {
    if !amount.is_finite() || amount < 0.0 {
        return Err(PilotError::Encoding(format!("Invalid amount: {}", amount)));
    }
    let rounded = format!("{:.*}", decimals, amount);
    parse_ether(&rounded).map_err(|e| PilotError::Encoding(format!("{}: {}", rounded, e)))
}

/// Wei to a float in ether units, for display and thresholds
pub fn from_wei(wei: U256) -> f64 {
    format_ether(wei).parse().unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::abi::ParamType;

    fn contracts() -> Contracts {
        Contracts::from_config(&ContractsConfig {
            router: "0x4ccB784744969D9B63C15cF07E622DDA65A88Ee7".to_string(),
            token: "0xcF259Bca0315C6D32e877793B6a10e97e7647FdE".to_string(),
            wrapped_native: "0xfbECae21C91446f9c7b87E4e5869926998f99ffe".to_string(),
            checkin: "0x73439c32e125B28139823fE9C6C079165E94C6D1".to_string(),
        })
        .unwrap()
    }

    fn encoder() -> OperationEncoder {
        OperationEncoder::new(Address::repeat_byte(0x42), contracts()).unwrap()
    }

    #[test]
    fn test_invalid_contract_address_is_config_error() {
        let err = Contracts::from_config(&ContractsConfig {
            router: "not-an-address".to_string(),
            token: String::new(),
            wrapped_native: String::new(),
            checkin: String::new(),
        })
        .unwrap_err();
        assert!(matches!(err, PilotError::Config(_)));
    }

    #[test]
    fn test_check_in_descriptor() {
        let d = encoder().check_in().unwrap();
        assert_eq!(d.to, contracts().checkin);
        assert_eq!(d.gas_limit, U256::from(120_000u64));
        assert_eq!(d.gas_price, Some(U256::from(10u64) * U256::exp10(9)));
        // selector only
        assert_eq!(d.data.len(), 4);
        assert_eq!(d.data.as_ref(), &ethers::utils::id("checkIn()")[..]);
    }

    #[test]
    fn test_swap_native_for_token_carries_value_and_path() {
        let amount = to_wei(0.37, 2).unwrap();
        let d = encoder().swap_native_for_token(amount, U256::zero()).unwrap();

        assert_eq!(d.to, contracts().router);
        assert_eq!(d.value, amount);
        assert_eq!(d.gas_limit, U256::from(300_000u64));

        let decoded = ethers::abi::decode(
            &[
                ParamType::Uint(256),
                ParamType::Array(Box::new(ParamType::Address)),
                ParamType::Address,
                ParamType::Uint(256),
            ],
            &d.data[4..],
        )
        .unwrap();
        let path = decoded[1].clone().into_array().unwrap();
        assert_eq!(path[0], Token::Address(contracts().wrapped_native));
        assert_eq!(path[1], Token::Address(contracts().token));
        assert_eq!(decoded[2], Token::Address(Address::repeat_byte(0x42)));

        let deadline = decoded[3].clone().into_uint().unwrap().as_u64() as i64;
        let now = chrono::Utc::now().timestamp();
        assert!(deadline > now && deadline <= now + 300);
    }

    #[test]
    fn test_swap_token_for_native_has_no_value() {
        let d = encoder()
            .swap_token_for_native(to_wei(1.5, 6).unwrap(), U256::zero())
            .unwrap();
        assert!(d.value.is_zero());
        assert_eq!(&d.data[..4], &ethers::utils::id("swapExactTokensForETH(uint256,uint256,address[],address,uint256)")[..]);
    }

    #[test]
    fn test_approve_targets_token_with_router_spender() {
        let d = encoder().approve(U256::from(1_000u64)).unwrap();
        assert_eq!(d.to, contracts().token);
        assert_eq!(d.gas_limit, U256::from(100_000u64));
        let decoded =
            ethers::abi::decode(&[ParamType::Address, ParamType::Uint(256)], &d.data[4..]).unwrap();
        assert_eq!(decoded[0], Token::Address(contracts().router));
    }

    #[test]
    fn test_decode_balance() {
        let encoded = ethers::abi::encode(&[Token::Uint(U256::exp10(18))]);
        let balance = encoder().decode_balance(&Bytes::from(encoded)).unwrap();
        assert_eq!(from_wei(balance), 1.0);

        assert!(encoder().decode_balance(&Bytes::default()).is_err());
    }

    #[test]
    fn test_to_wei_rounding() {
        assert_eq!(to_wei(0.2, 2).unwrap(), U256::exp10(17) * 2);
        assert_eq!(to_wei(0.123456, 2).unwrap(), U256::exp10(16) * 12);
        assert!(to_wei(-1.0, 2).is_err());
        assert!(to_wei(f64::NAN, 2).is_err());
    }
}
