//! ABI bindings for the protocol contracts the tooling talks to.
//!
//! Only the functions and events that deployment, wiring, validation and event gathering
//! use are declared here.

use alloy_core::sol;

sol! {
    /// CREATE2 factory owned by the deployer.
    interface IContractDeployer {
        event Deployed(address indexed deployed, uint256 salt);

        function deploy(bytes calldata bytecode, uint256 salt) external returns (address deployed);
        function owner() external view returns (address owner);
        function transferOwnership(address newOwner) external;
    }

    interface IERC20 {
        event Transfer(address indexed from, address indexed to, uint256 value);

        function totalSupply() external view returns (uint256 supply);
        function balanceOf(address account) external view returns (uint256 balance);
        function symbol() external view returns (string symbol);
        function decimals() external view returns (uint8 decimals);
        function transfer(address to, uint256 amount) external returns (bool success);
    }

    interface IWETH9 {
        function deposit() external payable;
    }

    interface IAccessHub {
        function initialize(
            address timelock,
            address treasury,
            address clGaugeFactory,
            address gaugeFactory,
            address feeDistributorFactory,
            address voter,
            address minter,
            address launcherPlugin,
            address xShadow,
            address shadowV3PoolFactory,
            address poolFactory,
            address feeRecipientFactory,
            address feeCollector,
            address voteModule
        ) external;
        function voter() external view returns (address voter);
    }

    interface IVoter {
        function initialize(
            address shadow,
            address legacyFactory,
            address gaugeFactory,
            address feeDistributorFactory,
            address minter,
            address governor,
            address xShadow,
            address clFactory,
            address clGaugeFactory,
            address nfpManager,
            address feeRecipientFactory,
            address voteModule,
            address launcherPlugin
        ) external;

        function whitelist(address token) external;
        function isWhitelisted(address token) external view returns (bool whitelisted);

        function getAllGauges() external view returns (address[] gauges);
        function isClGauge(address gauge) external view returns (bool isCl);
        function poolForGauge(address gauge) external view returns (address pool);
        function gaugeForPool(address pool) external view returns (address gauge);
    }

    interface IMinter {
        function kickoff(
            address shadow,
            address voter,
            uint256 initialSupply,
            address multisig,
            address xShadow
        ) external;
        function emissionsToken() external view returns (address token);
        function incentiveGrowth() external view returns (uint256 growth);
        function setIncentiveGrowth(uint256 growth) external;
    }

    interface IVoteModule {
        function initialize(address xShadow, address voter, address accessHub) external;
    }

    interface IClFactory {
        function initialize(address poolDeployer) external;
    }

    interface IPairFactory {
        function feeSetter() external view returns (address setter);
        function setFeeSetter(address setter) external;
    }

    /// Concentrated-liquidity pool events.
    interface IClPool {
        event Mint(
            address sender,
            address indexed owner,
            int24 indexed tickLower,
            int24 indexed tickUpper,
            uint128 amount,
            uint256 amount0,
            uint256 amount1
        );
        event Burn(
            address indexed owner,
            int24 indexed tickLower,
            int24 indexed tickUpper,
            uint128 amount,
            uint256 amount0,
            uint256 amount1
        );
        event Swap(
            address indexed sender,
            address indexed recipient,
            int256 amount0,
            int256 amount1,
            uint160 sqrtPriceX96,
            uint128 liquidity,
            int24 tick
        );

        function token0() external view returns (address token);
        function token1() external view returns (address token);
    }
}
