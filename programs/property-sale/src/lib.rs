//! Bindings for the `PropertySale` contract.
//!
//! The contract itself lives outside this workspace; this crate pins its ABI
//! so the indexer and the frontend agree on call and event shapes.

pub mod events;

use alloy::sol;

pub use events::{EventError, EventMeta, IndexedEvent, MarketplaceEvent};

sol! {
    #[sol(rpc)]
    #[derive(Debug, PartialEq, Eq)]
    contract PropertySale {
        struct Offer {
            address buyer;
            uint256 amount;
            bool active;
        }

        event PropertyListed(uint256 indexed propertyId, address indexed seller, uint256 price, string location, string locationHash);
        event PropertySold(uint256 indexed propertyId, address indexed seller, address indexed buyer, uint256 price);
        event OfferMade(uint256 indexed propertyId, address indexed buyer, uint256 amount);
        event OfferWithdrawn(uint256 indexed propertyId, address indexed buyer, uint256 amount);
        event PropertyStatusChanged(uint256 indexed propertyId, bool newStatus);
        event PropertyPriceUpdated(uint256 indexed propertyId, uint256 newPrice);

        function listProperty(string memory location, uint256 price, string memory uri) external;
        function buyProperty(uint256 propertyId) external payable;
        function relistProperty(uint256 propertyId, uint256 newPrice) external;
        function delistProperty(uint256 propertyId) external;
        function makeOffer(uint256 propertyId) external payable;
        function withdrawOffer(uint256 propertyId, uint256 offerIndex) external;
        function acceptOffer(uint256 propertyId, uint256 offerIndex) external;
        function refundOffer(uint256 propertyId, uint256 offerIndex) external;

        function getPropertyOffers(uint256 propertyId) external view returns (Offer[] memory);
        function getPropertyDetails(uint256 propertyId) external view returns (address owner, uint256 price, bool forSale, string memory location, string memory locationHash);
        function getOwnerProperties(address account) external view returns (uint256[] memory);
        function owner() external view returns (address);
    }
}
