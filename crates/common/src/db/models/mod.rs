//! SeaORM entity models
//!
//! Database entities for the KycFlow case store

mod customer_profile;
mod kyc_case;
mod outreach_ticket;
mod watchlist_entry;

pub use customer_profile::{
    Entity as CustomerProfileEntity,
    Model as CustomerProfile,
    ActiveModel as CustomerProfileActiveModel,
    Column as CustomerProfileColumn,
};

pub use kyc_case::{
    Entity as KycCaseEntity,
    Model as KycCase,
    ActiveModel as KycCaseActiveModel,
    Column as KycCaseColumn,
    CaseKind,
    CaseState,
};

pub use outreach_ticket::{
    Entity as OutreachTicketEntity,
    Model as OutreachTicket,
    ActiveModel as OutreachTicketActiveModel,
    Column as OutreachTicketColumn,
    TicketStatus,
};

pub use watchlist_entry::{
    Entity as WatchlistEntryEntity,
    Model as WatchlistEntry,
    ActiveModel as WatchlistEntryActiveModel,
    Column as WatchlistEntryColumn,
};
